#[derive(Debug, Clone)]
pub struct DotEnvyConfig {
    pub worker_server: WorkerServer,
    pub database: Database,
    pub stripe: Stripe,
    pub settlement: Settlement,
}

#[derive(Debug, Clone)]
pub struct WorkerServer {
    pub port: u16,
    pub timeout: u64,
    pub body_limit: u64,
}

#[derive(Debug, Clone)]
pub struct Database {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct Stripe {
    pub secret_key: String,
    pub api_base: String,
}

#[derive(Debug, Clone)]
pub struct Settlement {
    /// Internal routes answer 503 while this is unset.
    pub internal_token: Option<String>,
    pub enabled: bool,
    pub interval_secs: u64,
    pub reconciliation_grace_hours: i64,
}
