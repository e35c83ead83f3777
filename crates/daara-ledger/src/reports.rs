use std::str::FromStr;

use chrono::Utc;
use daara_core::{
    EngineError, EngineResult, EventEnvelope, Obligation, ObligationFilter, Settlement,
    SettlementFilter,
};
use daara_finance::{
    MemberBreakdown, ObligationFigures, PortfolioTotals, category_breakdown, figures,
    member_breakdown, portfolio_totals,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::SettlementEngine;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObligationView {
    pub obligation: Obligation,
    pub figures: ObligationFigures,
    pub settlements: Vec<Settlement>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CategoryKey {
    Program,
    /// Due period month, falling back to the creation month.
    Month,
    Kind,
}

impl CategoryKey {
    fn key_of(self, obligation: &Obligation) -> String {
        match self {
            Self::Program => obligation.program_id.to_string(),
            Self::Month => obligation
                .due_period
                .map(|period| period.month_key())
                .unwrap_or_else(|| obligation.created_at.format("%Y-%m").to_string()),
            Self::Kind => obligation.kind.as_str().to_string(),
        }
    }
}

impl FromStr for CategoryKey {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "program" => Ok(Self::Program),
            "month" => Ok(Self::Month),
            "kind" => Ok(Self::Kind),
            other => anyhow::bail!("unsupported category key: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryTotals {
    pub key: String,
    pub totals: PortfolioTotals,
}

impl SettlementEngine {
    pub async fn obligation_view(&self, obligation_id: Uuid) -> EngineResult<ObligationView> {
        let obligation = self.get_obligation(obligation_id).await?;
        let settlements = self.obligation_settlements(obligation_id).await?;
        Ok(ObligationView {
            figures: figures(&obligation, &settlements, Utc::now().date_naive()),
            obligation,
            settlements,
        })
    }

    pub async fn list_obligation_views(
        &self,
        filter: &ObligationFilter,
    ) -> EngineResult<Vec<ObligationView>> {
        let (obligations, settlements) = self.snapshot(filter).await?;
        let today = Utc::now().date_naive();
        Ok(obligations
            .into_iter()
            .map(|obligation| {
                let own: Vec<Settlement> = settlements
                    .iter()
                    .filter(|settlement| settlement.obligation_id == obligation.id)
                    .cloned()
                    .collect();
                ObligationView {
                    figures: figures(&obligation, &own, today),
                    obligation,
                    settlements: own,
                }
            })
            .collect())
    }

    pub async fn portfolio(&self, filter: &ObligationFilter) -> EngineResult<PortfolioTotals> {
        let (obligations, settlements) = self.snapshot(filter).await?;
        Ok(portfolio_totals(&obligations, &settlements))
    }

    pub async fn member_report(&self, member_id: &str) -> EngineResult<MemberBreakdown> {
        let (obligations, settlements) = self
            .snapshot(&ObligationFilter::by_member(member_id))
            .await?;
        Ok(member_breakdown(&obligations, &settlements, member_id))
    }

    pub async fn category_report(
        &self,
        filter: &ObligationFilter,
        key: CategoryKey,
    ) -> EngineResult<Vec<CategoryTotals>> {
        let (obligations, settlements) = self.snapshot(filter).await?;
        Ok(
            category_breakdown(&obligations, &settlements, |obligation| key.key_of(obligation))
                .into_iter()
                .map(|(key, totals)| CategoryTotals { key, totals })
                .collect(),
        )
    }

    pub async fn history(&self, obligation_id: Uuid) -> EngineResult<Vec<EventEnvelope>> {
        let events = self.events.stream(obligation_id).await?;
        if events.is_empty() {
            return Err(EngineError::ObligationNotFound(obligation_id));
        }
        Ok(events)
    }

    async fn snapshot(
        &self,
        filter: &ObligationFilter,
    ) -> EngineResult<(Vec<Obligation>, Vec<Settlement>)> {
        let obligations = self.store.obligations(filter).await?;
        if obligations.is_empty() {
            return Ok((obligations, Vec::new()));
        }
        let settlements = self
            .store
            .settlements(&SettlementFilter {
                obligation_ids: Some(obligations.iter().map(|obligation| obligation.id).collect()),
                ..SettlementFilter::default()
            })
            .await?;
        Ok((obligations, settlements))
    }
}
