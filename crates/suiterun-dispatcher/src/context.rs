//! Collaborators of a dispatcher, wired once at startup.

use std::sync::Arc;
use std::time::Duration;

use suiterun_broker::TaskBroker;
use suiterun_store::{HttpStore, MountedSecrets, RunStore, SecretStore, TaskStore};

use crate::config::{CompletionMode, Config};
use crate::discovery::{ScriptIndex, TestIndex};
use crate::pool::{LocalPool, PoolLauncher, PoolStatus};
use crate::report::{EmailReporter, Reporter};

/// Everything the state machine talks to.
#[derive(Clone)]
pub struct Context {
    pub product: String,
    pub runs: Arc<dyn RunStore>,
    pub tasks: Arc<dyn TaskStore>,
    pub broker: Arc<TaskBroker>,
    pub index: Arc<dyn TestIndex>,
    pub launcher: Arc<dyn PoolLauncher>,
    pub pool: Arc<dyn PoolStatus>,
    pub secrets: Arc<dyn SecretStore>,
    pub reporter: Arc<dyn Reporter>,
    pub poll_interval: Duration,
    pub completion: CompletionMode,
}

impl Context {
    /// Production wiring: HTTP store, AMQP broker, local worker pool,
    /// mounted secrets and the e-mail service.
    pub fn from_config(config: &Config) -> Self {
        let mut store = HttpStore::new(&config.store_endpoint);
        if let Some(key) = &config.store_authorization {
            store = store.with_authorization(key.clone());
        }
        let store = Arc::new(store);
        let pool = Arc::new(LocalPool::new(&config.worker_program));

        Self {
            product: config.product.clone(),
            runs: store.clone(),
            tasks: store,
            broker: Arc::new(TaskBroker::amqp(config.broker_uri.clone())),
            index: Arc::new(ScriptIndex::new(&config.index_script)),
            launcher: pool.clone(),
            pool,
            secrets: Arc::new(MountedSecrets::new(&config.secrets_root)),
            reporter: Arc::new(EmailReporter::new(&config.email_endpoint)),
            poll_interval: config.poll_interval,
            completion: config.completion,
        }
    }
}
