//! Derive-on-read settlement arithmetic.

mod figures;
mod guard;
mod portfolio;

pub use figures::{
    ObligationFigures, completion_percentage, figures, obligation_status, percentage_of,
    remaining_balance, settled_amount,
};
pub use guard::{MAX_AMOUNT, check_amount, check_confirmation, check_declaration};
pub use portfolio::{
    MemberBreakdown, PortfolioTotals, category_breakdown, member_breakdown, portfolio_totals,
};
