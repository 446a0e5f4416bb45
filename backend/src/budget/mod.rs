pub mod ledger;
pub mod migration;

pub use ledger::{BudgetLedger, LegacySpentBudgets, SpentCounters};
pub use migration::{MigrationReport, migrate_legacy_budgets};
