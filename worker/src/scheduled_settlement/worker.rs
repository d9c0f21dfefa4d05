use anyhow::Result;
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tracing::{error, info};

use crate::usecases::{
    reconcile_installments::ReconcileInstallmentsUseCase,
    settle_due_payments::SettleDuePaymentsUseCase,
};

pub async fn run(
    settlement: Arc<SettleDuePaymentsUseCase>,
    reconciliation: Arc<ReconcileInstallmentsUseCase>,
    interval_secs: u64,
) -> Result<()> {
    info!(interval_secs, "scheduled_settlement: starting worker loop");
    let interval = Duration::from_secs(interval_secs.max(1));

    loop {
        run_once(&settlement, &reconciliation).await;
        tokio::time::sleep(interval).await;
    }
}

/// One tick: settle whatever is due, then sweep for payments that need an
/// operator. Errors are logged and the loop keeps going.
pub async fn run_once(
    settlement: &SettleDuePaymentsUseCase,
    reconciliation: &ReconcileInstallmentsUseCase,
) {
    let now = Utc::now();

    match settlement.run(now).await {
        Ok(report) if report.processed > 0 => info!(
            succeeded = report.succeeded,
            failed = report.failed,
            errors = report.errors,
            "scheduled_settlement: settlement tick done"
        ),
        Ok(_) => info!("scheduled_settlement: nothing due"),
        Err(err) => error!(error = ?err, "scheduled_settlement: settlement run failed"),
    }

    if let Err(err) = reconciliation.run(now).await {
        error!(error = ?err, "scheduled_settlement: reconciliation scan failed");
    }
}
