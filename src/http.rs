//! Ambient HTTP surface: health, Prometheus scrape, and a diagnostics index.
//! The read/write API described as out of scope in the design is not served
//! here — this is purely operational surface for the two reconcilers.

use actix_web::{get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Serialize;

use crate::{translationjob, wikitarget};

#[derive(Clone)]
pub struct AppState {
    pub wikitarget: wikitarget::controller::State,
    pub translationjob: translationjob::controller::State,
    pub registry: Registry,
}

#[derive(Serialize)]
struct IndexResponse {
    wikitarget: wikitarget::controller::Diagnostics,
    translationjob: translationjob::controller::Diagnostics,
}

#[get("/metrics")]
async fn metrics(state: Data<AppState>, _req: HttpRequest) -> impl Responder {
    let families = state.registry.gather();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    encoder.encode(&families, &mut buffer).unwrap();
    HttpResponse::Ok().body(buffer)
}

#[get("/healthz")]
async fn healthz(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(state: Data<AppState>, _req: HttpRequest) -> impl Responder {
    let body = IndexResponse {
        wikitarget: state.wikitarget.diagnostics().await,
        translationjob: state.translationjob.diagnostics().await,
    };
    HttpResponse::Ok().json(&body)
}

pub async fn serve(state: AppState, bind: &str) -> std::io::Result<()> {
    HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/healthz"))
            .service(index)
            .service(healthz)
            .service(metrics)
    })
    .bind(bind)?
    .shutdown_timeout(5)
    .run()
    .await
}
