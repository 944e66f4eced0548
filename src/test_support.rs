//! A throwaway HTTP server standing in for Hazemon in tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use actix_web::{http::StatusCode, web, App, HttpRequest, HttpResponse, HttpServer};
use serde_json::Value;

#[derive(Clone, Debug)]
pub struct StubReply {
    pub status: u16,
    pub body: Value,
    pub delay: Option<Duration>,
}

impl StubReply {
    pub fn json(status: u16, body: Value) -> Self {
        StubReply { status, body, delay: None }
    }

    pub fn delayed(self, delay: Duration) -> Self {
        StubReply { delay: Some(delay), ..self }
    }
}

pub struct Stub {
    base: String,
    hits: Arc<Mutex<Vec<String>>>,
}

impl Stub {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Request paths in arrival order.
    pub fn hits(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }
}

/// Serves every GET path through `respond` on an ephemeral local port.
pub async fn spawn_stub<F>(respond: F) -> Stub
where
    F: Fn(&str) -> StubReply + Send + Sync + 'static,
{
    let respond = Arc::new(respond);
    let hits = Arc::new(Mutex::new(Vec::new()));
    let recorded = hits.clone();

    let server = HttpServer::new(move || {
        let respond = respond.clone();
        let hits = recorded.clone();
        App::new().route(
            "/{tail:.*}",
            web::get().to(move |req: HttpRequest| {
                let respond = respond.clone();
                let hits = hits.clone();
                async move {
                    let path = req.path().to_string();
                    hits.lock().unwrap().push(path.clone());
                    let reply = respond(&path);
                    if let Some(delay) = reply.delay {
                        actix_web::rt::time::sleep(delay).await;
                    }
                    HttpResponse::build(StatusCode::from_u16(reply.status).unwrap()).json(reply.body)
                }
            }),
        )
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .unwrap();

    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());

    Stub {
        base: format!("http://{}", addr),
        hits,
    }
}
