//! Test doubles for the dispatcher's collaborators.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use suiterun_core::{JobName, Run};
use tokio::sync::Mutex;

use crate::pool::{PoolLauncher, PoolMember, PoolRequest, PoolStatus};
use crate::report::Reporter;
use crate::DispatchError;

/// Pool that records launches and replays scripted member listings.
/// The last listing repeats once the script runs out.
#[derive(Clone, Default)]
pub struct FakePool {
    pub launches: Arc<Mutex<Vec<PoolRequest>>>,
    listings: Arc<Mutex<VecDeque<Result<Vec<PoolMember>, String>>>>,
    pub reject: Arc<Mutex<bool>>,
    pub queries: Arc<Mutex<usize>>,
}

impl FakePool {
    pub async fn push_members(&self, members: Vec<PoolMember>) {
        self.listings.lock().await.push_back(Ok(members));
    }

    pub async fn push_error(&self, message: &str) {
        self.listings.lock().await.push_back(Err(message.to_string()));
    }
}

#[async_trait]
impl PoolLauncher for FakePool {
    async fn launch(&self, request: &PoolRequest) -> Result<(), DispatchError> {
        if *self.reject.lock().await {
            return Err(DispatchError::PoolRejected("quota exceeded".to_string()));
        }
        self.launches.lock().await.push(request.clone());
        Ok(())
    }
}

#[async_trait]
impl PoolStatus for FakePool {
    async fn members(&self, _: &JobName) -> Result<Vec<PoolMember>, DispatchError> {
        *self.queries.lock().await += 1;
        let mut listings = self.listings.lock().await;
        let next = if listings.len() > 1 {
            listings.pop_front()
        } else {
            listings.front().cloned()
        };
        match next {
            Some(Ok(members)) => Ok(members),
            Some(Err(message)) => Err(DispatchError::PoolStatus(message)),
            None => Ok(Vec::new()),
        }
    }
}

/// Reporter that records every call.
#[derive(Clone, Default)]
pub struct RecordingReporter {
    pub calls: Arc<Mutex<Vec<(Run, Vec<String>, Option<String>)>>>,
    pub fail: Arc<Mutex<bool>>,
}

#[async_trait]
impl Reporter for RecordingReporter {
    async fn report(
        &self,
        run: &Run,
        recipients: &[String],
        template: Option<&str>,
    ) -> Result<(), DispatchError> {
        self.calls.lock().await.push((
            run.clone(),
            recipients.to_vec(),
            template.map(str::to_string),
        ));
        if *self.fail.lock().await {
            return Err(DispatchError::Report("mail server down".to_string()));
        }
        Ok(())
    }
}
