use core::{
    ffi::c_void,
    sync::atomic::{AtomicU32, Ordering},
};

/// Pulses seen on the flow sensor since the last window boundary.
///
/// The GPIO interrupt is the only writer. The sampler drains it with
/// [`PulseCounter::take`], which reads and zeroes the count in one atomic step so that
/// an edge landing on a window boundary is counted in exactly one of the two windows.
#[derive(Debug, Default)]
pub struct PulseCounter {
    pulses: AtomicU32,
}

impl PulseCounter {
    pub const fn new() -> Self {
        Self { pulses: AtomicU32::new(0) }
    }

    /// Records a single rising edge.
    pub fn record(&self) {
        // NOTE: We do not guard against integer overflow, but we do expect
        // the counter to be drained every sampling period.
        self.pulses.fetch_add(1, Ordering::Relaxed);
    }

    /// Pulses recorded so far in the current window.
    pub fn pending(&self) -> u32 {
        self.pulses.load(Ordering::Relaxed)
    }

    /// Drains the counter, starting a fresh window at zero.
    pub fn take(&self) -> u32 {
        self.pulses.swap(0, Ordering::Relaxed)
    }
}

/// GPIO interrupt handler. `arg` is the `&'static PulseCounter` it was registered with.
///
/// # Safety
///
/// `arg` must point to a `PulseCounter` that outlives the registration.
pub unsafe extern "C" fn on_edge(arg: *mut c_void) {
    // SAFETY: upheld by the caller; the counter is only touched through atomics.
    let counter = unsafe { &*arg.cast::<PulseCounter>() };
    counter.record();
}

#[cfg(feature = "espidf")]
pub use capture::EdgeCapture;

#[cfg(feature = "espidf")]
mod capture {
    use esp_idf_hal::gpio::{Input, InputPin, InterruptType, PinDriver};
    use esp_idf_sys::{
        esp, gpio_install_isr_service, gpio_intr_enable, gpio_isr_handler_add, gpio_isr_handler_remove, EspError,
        ESP_ERR_INVALID_STATE,
    };

    use super::{on_edge, PulseCounter};

    /// Counts rising edges of the sensor pin straight from the GPIO interrupt.
    ///
    /// The interrupt stays armed for the lifetime of this value, so edges keep being
    /// counted no matter what the executor thread is busy with.
    pub struct EdgeCapture<'d, T: InputPin> {
        pin: PinDriver<'d, T, Input>,
    }

    impl<'d, T: InputPin> EdgeCapture<'d, T> {
        pub fn attach(mut pin: PinDriver<'d, T, Input>, counter: &'static PulseCounter) -> Result<Self, EspError> {
            pin.set_interrupt_type(InterruptType::PosEdge)?;

            // SAFETY: plain ESP-IDF calls. The handler only performs an atomic increment
            // on a counter that lives for the whole program.
            unsafe {
                match esp!(gpio_install_isr_service(0)) {
                    // Another driver already installed the shared service.
                    Err(err) if err.code() == ESP_ERR_INVALID_STATE as i32 => {}
                    other => other?,
                }
                let arg = counter as *const PulseCounter as *mut _;
                esp!(gpio_isr_handler_add(pin.pin(), Some(on_edge), arg))?;
                esp!(gpio_intr_enable(pin.pin()))?;
            }
            Ok(Self { pin })
        }
    }

    impl<T: InputPin> Drop for EdgeCapture<'_, T> {
        fn drop(&mut self) {
            // SAFETY: removes the handler registered in `attach`.
            if let Err(err) = esp!(unsafe { gpio_isr_handler_remove(self.pin.pin()) }) {
                log::warn!("could not detach the flow sensor interrupt: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_resets_to_zero() {
        let counter = PulseCounter::new();
        for _ in 0..45 {
            counter.record();
        }
        assert_eq!(counter.take(), 45);
        assert_eq!(counter.pending(), 0);
        assert_eq!(counter.take(), 0);
    }

    #[test]
    fn counting_resumes_after_take() {
        let counter = PulseCounter::new();
        counter.record();
        counter.record();
        assert_eq!(counter.take(), 2);
        counter.record();
        assert_eq!(counter.pending(), 1);
        assert_eq!(counter.take(), 1);
    }

    #[test]
    fn interrupt_handler_counts_every_edge() {
        static COUNTER: PulseCounter = PulseCounter::new();
        let arg = &COUNTER as *const PulseCounter as *mut c_void;

        for _ in 0..3 {
            // SAFETY: `COUNTER` is static.
            unsafe { on_edge(arg) };
        }
        assert_eq!(COUNTER.take(), 3);

        // The handler keeps counting straight after a drain.
        unsafe { on_edge(arg) };
        assert_eq!(COUNTER.take(), 1);
    }

    #[test]
    fn concurrent_edges_are_never_lost() {
        use std::{sync::Arc, thread};

        const EDGES: u32 = 10_000;
        let counter = Arc::new(PulseCounter::new());
        let producer = {
            let counter = Arc::clone(&counter);
            thread::spawn(move || (0..EDGES).for_each(|_| counter.record()))
        };

        let mut drained = 0;
        while !producer.is_finished() {
            drained += counter.take();
        }
        producer.join().unwrap();
        drained += counter.take();

        assert_eq!(drained, EDGES);
    }
}
