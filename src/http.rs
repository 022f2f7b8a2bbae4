use embedded_svc::{http::Method, io::Write as _};
use esp_idf_svc::http::server::{Configuration, EspHttpServer};
use esp_idf_sys::EspError;
use std::{fs::File, io::Read as _, sync::Arc};

use crate::{
    config::{HTTP_PORT, INDEX_FILE},
    report::ReadingBoard,
};

/// Starts the server with the UI page at `/` and the latest reading at `/api/data`.
pub fn serve(board: Arc<ReadingBoard>) -> Result<EspHttpServer, EspError> {
    let mut server = EspHttpServer::new(&Configuration { http_port: HTTP_PORT, ..Default::default() })?;

    server.fn_handler("/", Method::Get, |req| {
        let Ok(mut file) = File::open(INDEX_FILE) else {
            log::warn!("{INDEX_FILE} is missing");
            let mut res = req.into_response(404, Some("Not Found"), &[("Content-Type", "text/plain")])?;
            res.write_all(b"File not found")?;
            return Ok(());
        };

        let mut res = req.into_response(200, None, &[("Content-Type", "text/html")])?;
        let mut buf = [0; 1024];
        loop {
            let count = file.read(&mut buf)?;
            if count == 0 {
                break;
            }
            res.write_all(&buf[..count])?;
        }
        Ok(())
    })?;

    server.fn_handler("/api/data", Method::Get, move |req| {
        let json = board.latest().to_json()?;
        let headers = [("Content-Type", "application/json"), ("Access-Control-Allow-Origin", "*")];
        req.into_response(200, None, &headers)?.write_all(json.as_bytes())?;
        Ok(())
    })?;

    log::info!("web server started on port {HTTP_PORT}");
    Ok(server)
}
