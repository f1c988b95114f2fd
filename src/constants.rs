/// Tokens meaning "and others" in the legacy free-text fields.
/// Longest first so suffix checks prefer the spaced variant.
pub const FILLER_TOKENS: [&str; 3] = ["u. a.", "u.a.", "etc."];

/// Values shorter than this (in characters) are not plausible names.
pub const DEFAULT_MIN_NAME_LENGTH: usize = 4;

/// Title prefix for works created when a composer cannot be attributed.
pub const PLACEHOLDER_WORK_PREFIX: &str = "Todo ";

/// Marker prefix in the correction map for entries needing manual review.
pub const AMBIGUOUS_MARKER: &str = "AMBIGUOUS: ";

/// Separator between candidates inside an ambiguity marker.
pub const AMBIGUOUS_SEPARATOR: &str = " | ";

// Destination tables, named after the application schema that reads them.
pub const TABLE_CONDUCTORS: &str = "Dirigenten";
pub const TABLE_COMPOSERS: &str = "Komponisten";
pub const TABLE_SOLOISTS: &str = "Solisten";
pub const TABLE_ORCHESTRAS: &str = "Orchester";
pub const TABLE_VENUES: &str = "Orte";
pub const TABLE_WORKS: &str = "Werke";
pub const TABLE_RECORDS: &str = "MusicRecords";
pub const TABLE_RECORD_WORKS: &str = "MusicRecordWerk";
pub const TABLE_RECORD_SOLOISTS: &str = "MusicRecordSolist";
pub const TABLE_DOCUMENTS: &str = "Documents";

/// Truncation order for a fresh run: link tables first, then dependents.
pub const TRUNCATE_ORDER: [&str; 10] = [
    TABLE_DOCUMENTS,
    TABLE_RECORD_SOLOISTS,
    TABLE_RECORD_WORKS,
    TABLE_RECORDS,
    TABLE_SOLOISTS,
    TABLE_WORKS,
    TABLE_COMPOSERS,
    TABLE_ORCHESTRAS,
    TABLE_CONDUCTORS,
    TABLE_VENUES,
];
