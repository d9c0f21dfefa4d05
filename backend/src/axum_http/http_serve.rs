use crate::{
    axum_http::{
        default_routers,
        routers::{self, installment_plans::InstallmentPlanRouteState},
    },
    config::config_model::DotEnvyConfig,
    usecases::{installment_plans::InstallmentPlanUseCase, pricing_resolver::PricingResolver},
};
use anyhow::{Context, Result};
use axum::{
    Router,
    http::{
        HeaderValue, Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::get,
};
use crates::{
    infra::db::{
        postgres::postgres_connection::PgPoolSquad,
        repositories::{
            installment_payments::InstallmentPaymentPostgres,
            installment_plans::InstallmentPlanPostgres,
        },
    },
    payments::stripe_client::{StripeClient, StripeClientConfig},
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info};

pub async fn start(config: Arc<DotEnvyConfig>, db_pool: Arc<PgPoolSquad>) -> Result<()> {
    let stripe_client = Arc::new(StripeClient::new(StripeClientConfig {
        secret_key: config.stripe.secret_key.clone(),
        webhook_secret: config.stripe.webhook_secret.clone(),
        api_base: config.stripe.api_base.clone(),
    }));
    if config.stripe.webhook_secret.is_none() {
        info!("STRIPE_WEBHOOK_SECRET is not set; stripe webhooks will be rejected");
    }

    let pricing = Arc::new(PricingResolver::new(Arc::new(
        config.checkout.pricing_catalog.clone(),
    )));
    let installment_plan_usecase = Arc::new(InstallmentPlanUseCase::new(
        Arc::new(InstallmentPlanPostgres::new(Arc::clone(&db_pool))),
        Arc::new(InstallmentPaymentPostgres::new(Arc::clone(&db_pool))),
        stripe_client,
    ));

    let app = Router::new()
        .fallback(default_routers::not_found)
        .nest(
            "/api/v1/checkout",
            routers::checkout::routes(Arc::clone(&pricing)),
        )
        .nest(
            "/api/v1/installment-plans",
            routers::installment_plans::routes(InstallmentPlanRouteState {
                usecase: Arc::clone(&installment_plan_usecase),
                pricing,
                balance_due: config.checkout.balance_due,
            }),
        )
        .nest(
            "/api/v1/stripe",
            routers::stripe_webhook::routes(installment_plan_usecase),
        )
        .route("/api/v1/health-check", get(default_routers::health_check))
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.backend_server.timeout,
        )))
        .layer(RequestBodyLimitLayer::new(
            (config.backend_server.body_limit * 1024 * 1024).try_into()?,
        ))
        .layer(cors_layer(&config.backend_server.allowed_origins)?)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.backend_server.port));
    let listener = TcpListener::bind(addr).await?;

    info!("Server is running on port {}", config.backend_server.port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn cors_layer(allowed_origins: &[String]) -> Result<CorsLayer> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE]);

    if allowed_origins.is_empty() {
        return Ok(layer.allow_origin(Any));
    }

    let origins = allowed_origins
        .iter()
        .map(|origin| {
            origin
                .parse::<HeaderValue>()
                .with_context(|| format!("CORS origin {origin:?} is invalid"))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(layer.allow_origin(origins))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to install CTRL+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM signal handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl+C signal"),
        _ = terminate => info!("Received terminate signal"),
    }
}
