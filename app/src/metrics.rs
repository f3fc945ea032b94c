use hyper::{
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_with_registry, Encoder, HistogramVec, IntCounterVec, IntGauge, Registry,
    TextEncoder,
};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;

use crate::error::Error;

// Create a new registry named `orchestrator`
lazy_static! {
    pub static ref ORCHESTRATOR_REGISTRY: Registry =
        Registry::new_custom(Some("orchestrator".to_string()), None).unwrap();
}

// Register metrics with the `orchestrator` registry
lazy_static! {
    pub static ref OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec_with_registry!(
        "operations_total",
        "Lifecycle operations invoked, by operation and outcome",
        &["operation", "outcome"],
        ORCHESTRATOR_REGISTRY
    )
    .unwrap();
    pub static ref CHAIN_TRANSITIONS_TOTAL: IntCounterVec =
        register_int_counter_vec_with_registry!(
            "chain_transitions_total",
            "Chain status transitions applied",
            &["from", "to"],
            ORCHESTRATOR_REGISTRY
        )
        .unwrap();
    pub static ref BACKGROUND_JOBS_TOTAL: IntCounterVec = register_int_counter_vec_with_registry!(
        "background_jobs_total",
        "Deferred jobs run to completion, by job and outcome",
        &["job", "outcome"],
        ORCHESTRATOR_REGISTRY
    )
    .unwrap();
    pub static ref BACKGROUND_JOBS_PENDING: IntGauge = register_int_gauge_with_registry!(
        "background_jobs_pending",
        "Deferred jobs scheduled but not yet finished",
        ORCHESTRATOR_REGISTRY
    )
    .unwrap();
    pub static ref DEPLOYMENT_STEP_DURATION: HistogramVec =
        register_histogram_vec_with_registry!(
            "deployment_step_duration_seconds",
            "Time spent in each provisioning step",
            &["step", "outcome"],
            ORCHESTRATOR_REGISTRY
        )
        .unwrap();
    pub static ref DEPLOYMENT_OUTCOMES_TOTAL: IntCounterVec =
        register_int_counter_vec_with_registry!(
            "deployment_outcomes_total",
            "How chains left the deploying state",
            &["outcome"],
            ORCHESTRATOR_REGISTRY
        )
        .unwrap();
}

/// Records the outcome of a caller-facing operation
pub fn observe<T>(operation: &str, result: &Result<T, Error>) {
    let outcome = match result {
        Ok(_) => "success",
        Err(e) => e.kind().into(),
    };
    OPERATIONS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
}

pub async fn start_server(port_number: Option<u16>) {
    // Default port is 9001 if not specified
    const DEFAULT_PORT: u16 = 9001;

    let port = port_number.unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let make_svc =
        make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(handle_request)) });

    let server = Server::bind(&addr).serve(make_svc);

    // runs until the runtime shuts down with the process
    tokio::spawn(async move {
        tracing::info!("Starting metrics server on {}", addr);

        if let Err(e) = server.await {
            tracing::error!("Metrics server error: {}", e);
        }
    });
}

async fn handle_request(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let mut metric_families = ORCHESTRATOR_REGISTRY.gather();
            metric_families.extend(prometheus::gather());

            let encoder = TextEncoder::new();
            let mut buffer = Vec::new();
            match encoder.encode(&metric_families, &mut buffer) {
                Ok(()) => Response::builder()
                    .status(StatusCode::OK)
                    .header(hyper::header::CONTENT_TYPE, encoder.format_type())
                    .body(Body::from(buffer)),
                Err(e) => Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Body::from(e.to_string())),
            }
        }
        (&Method::GET, "/health") => {
            let health_status = json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "pendingJobs": BACKGROUND_JOBS_PENDING.get(),
            });
            Response::builder()
                .status(StatusCode::OK)
                .header(hyper::header::CONTENT_TYPE, "application/json")
                .body(Body::from(health_status.to_string()))
        }
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::from("Not Found")),
    };

    Ok(response.unwrap_or_else(|_| Response::new(Body::empty())))
}
