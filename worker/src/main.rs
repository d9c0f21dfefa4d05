use anyhow::Result;
use crates::{
    domain::repositories::{
        installment_payments::InstallmentPaymentRepository,
        installment_plans::InstallmentPlanRepository,
    },
    infra::db::{
        postgres::postgres_connection,
        repositories::{
            installment_payments::InstallmentPaymentPostgres,
            installment_plans::InstallmentPlanPostgres,
        },
    },
    payments::{
        gateway::StripeGateway,
        stripe_client::{StripeClient, StripeClientConfig},
    },
};
use std::sync::Arc;
use tracing::{error, info};
use worker::{
    axum_http::{self, routers::settlements::SettlementRouteState},
    config, scheduled_settlement,
    usecases::{
        force_settle_payment::ForceSettlePaymentUseCase,
        reconcile_installments::ReconcileInstallmentsUseCase,
        settle_due_payments::SettleDuePaymentsUseCase,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    if let Err(error) = run().await {
        error!("Worker exited with error: {:#}", error);
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    crates::observability::init_observability("worker")?;

    let dotenvy_env = Arc::new(config::config_loader::load()?);
    info!("ENV has been loaded");

    let postgres_pool = postgres_connection::establish_connection(&dotenvy_env.database.url)?;
    info!("Postgres connection has been established");

    let db_pool_arc = Arc::new(postgres_pool);

    let plan_repository: Arc<dyn InstallmentPlanRepository + Send + Sync> =
        Arc::new(InstallmentPlanPostgres::new(Arc::clone(&db_pool_arc)));
    let payment_repository: Arc<dyn InstallmentPaymentRepository + Send + Sync> =
        Arc::new(InstallmentPaymentPostgres::new(Arc::clone(&db_pool_arc)));

    // The worker only charges; webhooks are handled by the backend.
    let stripe_client: Arc<dyn StripeGateway + Send + Sync> =
        Arc::new(StripeClient::new(StripeClientConfig {
            secret_key: dotenvy_env.stripe.secret_key.clone(),
            webhook_secret: None,
            api_base: dotenvy_env.stripe.api_base.clone(),
        }));

    let settlement_usecase = Arc::new(SettleDuePaymentsUseCase::new(
        plan_repository,
        Arc::clone(&payment_repository),
        stripe_client,
    ));
    let force_settle_usecase = Arc::new(ForceSettlePaymentUseCase::new(
        Arc::clone(&payment_repository),
        Arc::clone(&settlement_usecase),
    ));
    let reconciliation_usecase = Arc::new(ReconcileInstallmentsUseCase::new(
        payment_repository,
        dotenvy_env.settlement.reconciliation_grace_hours,
    ));

    let server_config = Arc::clone(&dotenvy_env);
    let route_state = SettlementRouteState {
        config: Arc::clone(&dotenvy_env),
        settlement: Arc::clone(&settlement_usecase),
        force_settle: force_settle_usecase,
        reconciliation: Arc::clone(&reconciliation_usecase),
    };
    let settlement_server =
        tokio::spawn(async move { axum_http::http_serve::start(server_config, route_state).await });

    if !dotenvy_env.settlement.enabled {
        info!("SETTLEMENT_ENABLED is false; scheduled settlement is off");
        settlement_server.await??;
        return Ok(());
    }

    // Spawn background loop
    let settlement_loop = tokio::spawn(scheduled_settlement::worker::run(
        settlement_usecase,
        reconciliation_usecase,
        dotenvy_env.settlement.interval_secs,
    ));

    tokio::select! {
        result = settlement_loop => result??,
        result = settlement_server => result??,
    };
    Ok(())
}
