mod loader;

pub use loader::{RateLoadSummary, TaxDataLoader, TaxDataLoaderError, TaxRateRecord, TaxRuleRecord};
