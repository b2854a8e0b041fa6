//! License subscriptions, tenant settings and engine start/stop.

use crate::engine;
use crate::error::{internal, ServiceError};
use crate::ledger::{Ledger, SettingsUpdate};
use crate::{Aviator, Backend};
use grandaviator_types::{
    api::{SubscribeRequest, SubscribeResponse, UnsubscribeResponse},
    now_unix, SettingsPatch, TenantRiskSettings,
};
use std::sync::Arc;
use tracing::{info, warn};

impl<B: Backend> Aviator<B> {
    /// Buy or renew a license and make sure the organization's engine is running.
    pub async fn subscribe(
        self: &Arc<Self>,
        request: SubscribeRequest,
    ) -> Result<SubscribeResponse, ServiceError> {
        let org_id = request.org_id.trim();
        if org_id.is_empty() {
            return Err(ServiceError::forbidden("organization id is required"));
        }
        let now = now_unix();
        let settings = match self
            .ledger()
            .find_settings(org_id)
            .await
            .map_err(internal("failed to read settings"))?
        {
            None => {
                let expiration = request.package.extend(0, now, request.duration);
                let settings = TenantRiskSettings::new(org_id, expiration);
                self.ledger()
                    .insert_settings(&settings)
                    .await
                    .map_err(internal("failed to create settings"))?;
                settings
            }
            Some(mut settings) => {
                let expiration =
                    request
                        .package
                        .extend(settings.license_expiration, now, request.duration);
                let updated = self
                    .ledger()
                    .set_license_expiration(org_id, expiration)
                    .await
                    .map_err(internal("failed to extend license"))?;
                if !updated {
                    return Err(ServiceError::not_found("settings not found"));
                }
                settings.license_expiration = expiration;
                settings
            }
        };
        info!(
            org_id,
            package = ?request.package,
            duration = request.duration,
            license_expiration = settings.license_expiration,
            "subscription updated"
        );
        self.start_engine(org_id);
        Ok(SubscribeResponse {
            message: "subscription has been updated".to_string(),
            settings,
        })
    }

    /// Stop the organization's engine. Settings and license are kept.
    pub async fn unsubscribe(&self, org_id: &str) -> UnsubscribeResponse {
        let stopped = self.registry().stop(org_id).await;
        UnsubscribeResponse {
            message: if stopped {
                "round engine stopped".to_string()
            } else {
                "round engine was not running".to_string()
            },
            stopped,
        }
    }

    pub async fn get_settings(&self, org_id: &str) -> Result<TenantRiskSettings, ServiceError> {
        self.ledger()
            .find_settings(org_id)
            .await
            .map_err(internal("failed to read settings"))?
            .ok_or_else(|| ServiceError::not_found("settings not found"))
    }

    pub async fn update_settings(
        &self,
        org_id: &str,
        patch: SettingsPatch,
    ) -> Result<TenantRiskSettings, ServiceError> {
        match self
            .ledger()
            .update_settings(org_id, &patch)
            .await
            .map_err(internal("failed to update settings"))?
        {
            SettingsUpdate::Updated(settings) => {
                info!(org_id, "settings updated");
                Ok(settings)
            }
            SettingsUpdate::NotFound => Err(ServiceError::not_found("settings not found")),
            SettingsUpdate::Rejected(err) => Err(ServiceError::forbidden(err.to_string())),
        }
    }

    /// Start the organization's engine unless it is already running.
    pub fn start_engine(self: &Arc<Self>, org_id: &str) -> bool {
        let aviator = Arc::clone(self);
        let owned = org_id.to_string();
        self.registry()
            .start(org_id, move |cancel| engine::run(aviator, owned, cancel))
    }

    /// Start an engine for every organization with settings in the ledger.
    pub async fn start_all(self: &Arc<Self>) -> anyhow::Result<usize> {
        let mut started = 0;
        for settings in self.ledger().all_settings().await? {
            if !settings.license_active(now_unix()) {
                warn!(org_id = %settings.org_id, "skipping engine start: license expired");
                continue;
            }
            if self.start_engine(&settings.org_id) {
                started += 1;
            }
        }
        info!(started, "round engines started");
        Ok(started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::RoundStore;
    use crate::test_support::{eventually, fast_config, licensed, mocked, ORG};
    use grandaviator_types::SubscriptionPackage;

    fn subscribe_request(package: SubscriptionPackage, duration: u32) -> SubscribeRequest {
        SubscribeRequest {
            org_id: ORG.into(),
            package,
            duration,
        }
    }

    #[tokio::test]
    async fn test_subscribe_creates_settings_and_starts_engine() {
        let aviator = mocked(fast_config());
        let before = now_unix();
        let response = aviator
            .subscribe(subscribe_request(SubscriptionPackage::Weekly, 1))
            .await
            .unwrap();
        assert_eq!(response.message, "subscription has been updated");
        assert!(response.settings.license_expiration >= before + 7 * 86_400);
        assert_eq!(response.settings.max_demo_stake, 1.0);
        assert!(aviator.registry().is_running(ORG));
        assert!(eventually(|| async { aviator.rounds().flight_count(ORG) > 0 }).await);

        let stopped = aviator.unsubscribe(ORG).await;
        assert!(stopped.stopped);
        assert!(!aviator.registry().is_running(ORG));
        assert!(aviator.get_settings(ORG).await.is_ok());
    }

    #[tokio::test]
    async fn test_renewal_extends_and_keeps_one_engine() {
        let aviator = mocked(fast_config());
        let first = aviator
            .subscribe(subscribe_request(SubscriptionPackage::Daily, 1))
            .await
            .unwrap();
        let second = aviator
            .subscribe(subscribe_request(SubscriptionPackage::Daily, 2))
            .await
            .unwrap();
        assert_eq!(
            second.settings.license_expiration,
            first.settings.license_expiration + 2 * 86_400
        );
        assert_eq!(aviator.registry().running(), vec![ORG.to_string()]);
        aviator.registry().stop_all().await;
    }

    #[tokio::test]
    async fn test_unsubscribe_without_engine() {
        let aviator = mocked(fast_config());
        let response = aviator.unsubscribe(ORG).await;
        assert!(!response.stopped);
    }

    #[tokio::test]
    async fn test_settings_errors() {
        let aviator = mocked(fast_config());
        let err = aviator.get_settings(ORG).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = aviator
            .update_settings(ORG, SettingsPatch::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        licensed(&aviator).await;
        let err = aviator
            .update_settings(
                ORG,
                SettingsPatch {
                    min_total_bets: Some(5_000),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let updated = aviator
            .update_settings(
                ORG,
                SettingsPatch {
                    amount_to_risk: Some(75.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.amount_to_risk, 75.0);
        assert_eq!(aviator.get_settings(ORG).await.unwrap(), updated);
    }

    #[tokio::test]
    async fn test_start_all_skips_expired() {
        let aviator = mocked(fast_config());
        licensed(&aviator).await;
        aviator
            .ledger()
            .insert_settings(&TenantRiskSettings::new("expired", now_unix() - 10))
            .await
            .unwrap();
        assert_eq!(aviator.start_all().await.unwrap(), 1);
        assert_eq!(aviator.registry().running(), vec![ORG.to_string()]);
        aviator.registry().stop_all().await;
    }
}
