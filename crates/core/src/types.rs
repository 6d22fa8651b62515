/// Estimate number identifying the quotation a recalculation belongs to.
pub type CorrelationKey = String;

/// Zero-based index of the quotation sheet inside an estimate.
pub type SheetIndex = u32;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
