//! Durable store: organization settings and budgets, finished flights, and bet history.

use anyhow::Result;
use grandaviator_execution::Allocation;
use grandaviator_types::{
    api::PageQuery, Flight, PlaneBet, SettingsError, SettingsPatch, TenantRiskSettings,
};
use std::future::Future;

/// Result of applying a settings patch.
#[derive(Clone, Debug, PartialEq)]
pub enum SettingsUpdate {
    Updated(TenantRiskSettings),
    NotFound,
    Rejected(SettingsError),
}

pub trait Ledger: Clone + Send + Sync + 'static {
    fn find_settings(
        &self,
        org_id: &str,
    ) -> impl Future<Output = Result<Option<TenantRiskSettings>>> + Send;

    fn all_settings(&self) -> impl Future<Output = Result<Vec<TenantRiskSettings>>> + Send;

    /// Insert or replace an organization's settings.
    fn insert_settings(
        &self,
        settings: &TenantRiskSettings,
    ) -> impl Future<Output = Result<()>> + Send;

    fn update_settings(
        &self,
        org_id: &str,
        patch: &SettingsPatch,
    ) -> impl Future<Output = Result<SettingsUpdate>> + Send;

    /// Returns false when the organization has no settings.
    fn set_license_expiration(
        &self,
        org_id: &str,
        expiration: i64,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Add the deltas to amount-to-risk and reserved balance.
    fn adjust_budget(
        &self,
        org_id: &str,
        amount_to_risk: f64,
        reserved_balance: f64,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Run the budget cascade for `requested` and persist the remaining budget in one step.
    fn reserve_risk(
        &self,
        org_id: &str,
        requested: f64,
    ) -> impl Future<Output = Result<Allocation>> + Send;

    fn insert_flight(&self, flight: &Flight) -> impl Future<Output = Result<()>> + Send;

    /// Insert or replace bets by id.
    fn insert_bets(&self, bets: &[PlaneBet]) -> impl Future<Output = Result<()>> + Send;

    /// A user's persisted bets, newest first.
    fn bets_page(
        &self,
        user_id: &str,
        page: PageQuery,
    ) -> impl Future<Output = Result<Vec<PlaneBet>>> + Send;
}

#[cfg(any(test, feature = "mocks"))]
pub use memory::Memory;

#[cfg(any(test, feature = "mocks"))]
mod memory {
    use super::*;
    use anyhow::anyhow;
    use grandaviator_execution::allocate_risk;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex, MutexGuard};

    #[derive(Default)]
    struct Inner {
        settings: BTreeMap<String, TenantRiskSettings>,
        flights: Vec<Flight>,
        bets: Vec<PlaneBet>,
    }

    /// In-memory ledger.
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

        pub fn flights(&self) -> Vec<Flight> {
            self.lock().flights.clone()
        }

        pub fn bets(&self) -> Vec<PlaneBet> {
            self.lock().bets.clone()
        }
    }

    impl Ledger for Memory {
        async fn find_settings(&self, org_id: &str) -> Result<Option<TenantRiskSettings>> {
            Ok(self.lock().settings.get(org_id).cloned())
        }

        async fn all_settings(&self) -> Result<Vec<TenantRiskSettings>> {
            Ok(self.lock().settings.values().cloned().collect())
        }

        async fn insert_settings(&self, settings: &TenantRiskSettings) -> Result<()> {
            self.lock()
                .settings
                .insert(settings.org_id.clone(), settings.clone());
            Ok(())
        }

        async fn update_settings(
            &self,
            org_id: &str,
            patch: &SettingsPatch,
        ) -> Result<SettingsUpdate> {
            let mut inner = self.lock();
            let Some(settings) = inner.settings.get_mut(org_id) else {
                return Ok(SettingsUpdate::NotFound);
            };
            Ok(match settings.apply(patch) {
                Ok(()) => SettingsUpdate::Updated(settings.clone()),
                Err(err) => SettingsUpdate::Rejected(err),
            })
        }

        async fn set_license_expiration(&self, org_id: &str, expiration: i64) -> Result<bool> {
            let mut inner = self.lock();
            let Some(settings) = inner.settings.get_mut(org_id) else {
                return Ok(false);
            };
            settings.license_expiration = expiration;
            Ok(true)
        }

        async fn adjust_budget(
            &self,
            org_id: &str,
            amount_to_risk: f64,
            reserved_balance: f64,
        ) -> Result<()> {
            let mut inner = self.lock();
            let settings = inner
                .settings
                .get_mut(org_id)
                .ok_or_else(|| anyhow!("no settings for {org_id}"))?;
            settings.amount_to_risk += amount_to_risk;
            settings.reserved_balance += reserved_balance;
            Ok(())
        }

        async fn reserve_risk(&self, org_id: &str, requested: f64) -> Result<Allocation> {
            let mut inner = self.lock();
            let settings = inner
                .settings
                .get_mut(org_id)
                .ok_or_else(|| anyhow!("no settings for {org_id}"))?;
            let allocation = allocate_risk(settings.budget(), requested);
            settings.amount_to_risk = allocation.remaining.amount_to_risk;
            settings.reserved_balance = allocation.remaining.reserved_balance;
            Ok(allocation)
        }

        async fn insert_flight(&self, flight: &Flight) -> Result<()> {
            let mut inner = self.lock();
            inner.flights.retain(|stored| stored.id != flight.id);
            inner.flights.push(flight.clone());
            Ok(())
        }

        async fn insert_bets(&self, bets: &[PlaneBet]) -> Result<()> {
            let mut inner = self.lock();
            for bet in bets {
                match inner.bets.iter().position(|stored| stored.id == bet.id) {
                    Some(position) => inner.bets[position] = bet.clone(),
                    None => inner.bets.push(bet.clone()),
                }
            }
            Ok(())
        }

        async fn bets_page(&self, user_id: &str, page: PageQuery) -> Result<Vec<PlaneBet>> {
            let page = page.normalized();
            let inner = self.lock();
            // Equal timestamps fall back to insertion order, newest first.
            let mut bets: Vec<(usize, &PlaneBet)> = inner
                .bets
                .iter()
                .enumerate()
                .filter(|(_, bet)| bet.user_id == user_id)
                .collect();
            bets.sort_by(|(ia, a), (ib, b)| {
                b.date_created.cmp(&a.date_created).then(ib.cmp(ia))
            });
            Ok(bets
                .into_iter()
                .skip(page.offset() as usize)
                .take(page.limit as usize)
                .map(|(_, bet)| bet.clone())
                .collect())
        }
    }
}
