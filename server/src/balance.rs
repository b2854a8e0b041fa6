//! Balance service: resolves users and moves money on their accounts.

use anyhow::{bail, Context, Result};
use grandaviator_types::{AccountKind, User};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Signed change to one of a user's balances.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceAdjustment {
    pub user_id: String,
    pub org_id: String,
    pub account: AccountKind,
    /// Negative debits, positive credits.
    pub amount: f64,
    /// Label of the service requesting the change.
    pub source: String,
}

pub trait BalanceService: Clone + Send + Sync + 'static {
    fn find_user(&self, user_id: &str) -> impl Future<Output = Result<Option<User>>> + Send;

    fn adjust_balance(
        &self,
        adjustment: &BalanceAdjustment,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// JSON-over-HTTP balance client.
#[derive(Clone)]
pub struct HttpBalanceClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpBalanceClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(5))
            .build()
            .context("build balance http client")?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl BalanceService for HttpBalanceClient {
    async fn find_user(&self, user_id: &str) -> Result<Option<User>> {
        let response = self
            .http_client
            .get(format!("{}/users/{}", self.base_url, user_id))
            .send()
            .await
            .context("request user")?;
        match response.status() {
            reqwest::StatusCode::NOT_FOUND => Ok(None),
            reqwest::StatusCode::OK => {
                let user = response.json::<User>().await.context("decode user")?;
                Ok(Some(user))
            }
            status => bail!("balance service returned {status} for user {user_id}"),
        }
    }

    async fn adjust_balance(&self, adjustment: &BalanceAdjustment) -> Result<()> {
        let response = self
            .http_client
            .post(format!("{}/balances/adjust", self.base_url))
            .json(adjustment)
            .send()
            .await
            .context("request balance adjustment")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("balance adjustment failed: {status}: {body}");
        }
        Ok(())
    }
}

#[cfg(any(test, feature = "mocks"))]
pub use memory::Memory;

#[cfg(any(test, feature = "mocks"))]
mod memory {
    use super::*;
    use anyhow::anyhow;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex, MutexGuard};

    #[derive(Default)]
    struct Inner {
        users: HashMap<String, User>,
        adjustments: Vec<BalanceAdjustment>,
        failing: bool,
    }

    /// In-memory balance service.
    #[derive(Clone, Default)]
    pub struct Memory {
        inner: Arc<Mutex<Inner>>,
    }

    impl Memory {
        fn lock(&self) -> MutexGuard<'_, Inner> {
            match self.inner.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            }
        }

        pub fn insert_user(&self, user: User) {
            self.lock().users.insert(user.id.clone(), user);
        }

        pub fn user(&self, user_id: &str) -> Option<User> {
            self.lock().users.get(user_id).cloned()
        }

        pub fn adjustments(&self) -> Vec<BalanceAdjustment> {
            self.lock().adjustments.clone()
        }

        /// Make every following adjustment fail.
        pub fn set_failing(&self, failing: bool) {
            self.lock().failing = failing;
        }
    }

    impl BalanceService for Memory {
        async fn find_user(&self, user_id: &str) -> Result<Option<User>> {
            Ok(self.user(user_id))
        }

        async fn adjust_balance(&self, adjustment: &BalanceAdjustment) -> Result<()> {
            let mut inner = self.lock();
            if inner.failing {
                bail!("balance service unavailable");
            }
            let user = inner
                .users
                .get_mut(&adjustment.user_id)
                .ok_or_else(|| anyhow!("unknown user {}", adjustment.user_id))?;
            match adjustment.account {
                AccountKind::Demo => user.demo_balance += adjustment.amount,
                AccountKind::Live => user.live_balance += adjustment.amount,
            }
            inner.adjustments.push(adjustment.clone());
            Ok(())
        }
    }
}
