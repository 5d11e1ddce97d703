/// Error code registry for solbatch
///
/// Error codes are organized by category:
/// - 1000-1999: Configuration errors
/// - 2000-2999: Setup errors (templates, identifiers, statement preparation)
/// - 3000-3999: Storage errors
/// - 4000-4999: Execution errors
/// - 5000-5999: Merge errors
pub struct ErrorCode;

impl ErrorCode {
    // Configuration errors (1000-1999)
    pub const CONFIG_GENERIC: u16 = 1000;
    pub const CONFIG_NOT_FOUND: u16 = 1001;
    pub const CONFIG_INVALID_YAML: u16 = 1002;
    pub const CONFIG_INVALID_JSON: u16 = 1003;
    pub const CONFIG_INVALID_TOML: u16 = 1004;
    pub const CONFIG_UNSUPPORTED_FORMAT: u16 = 1005;
    pub const CONFIG_INVALID_VALUE: u16 = 1006;

    // Setup errors (2000-2999)
    pub const SETUP_GENERIC: u16 = 2000;
    pub const SETUP_TEMPLATE_MISSING: u16 = 2001;
    pub const SETUP_TEMPLATE_INVALID: u16 = 2002;
    pub const SETUP_IDENTIFIERS_UNREADABLE: u16 = 2003;
    pub const SETUP_IDENTIFIERS_EMPTY: u16 = 2004;
    pub const SETUP_PREPARE_FAILED: u16 = 2005;
    pub const SETUP_CONNECT_FAILED: u16 = 2006;
    pub const SETUP_BACKEND_UNAVAILABLE: u16 = 2007;
    pub const SETUP_SPOOL_NAME_AMBIGUOUS: u16 = 2008;

    // Storage errors (3000-3999)
    pub const STORAGE_GENERIC: u16 = 3000;
    pub const STORAGE_IO_ERROR: u16 = 3001;
    pub const STORAGE_PERMISSION_DENIED: u16 = 3002;
    pub const STORAGE_NOT_FOUND: u16 = 3003;
    pub const STORAGE_ALREADY_EXISTS: u16 = 3004;
    pub const STORAGE_CSV_ERROR: u16 = 3005;

    // Execution errors (4000-4999)
    pub const EXEC_GENERIC: u16 = 4000;
    pub const EXEC_WORKER_PANICKED: u16 = 4001;
    pub const EXEC_LOG_SINK_FAILED: u16 = 4002;

    // Merge errors (5000-5999)
    pub const MERGE_GENERIC: u16 = 5000;
    pub const MERGE_DISCOVERY_FAILED: u16 = 5001;
    pub const MERGE_FILE_UNREADABLE: u16 = 5002;
}

/// Get a human-readable description for an error code
pub fn describe_error_code(code: u16) -> &'static str {
    match code {
        1000 => "Generic configuration error",
        1001 => "Configuration file not found",
        1002 => "Invalid YAML syntax in configuration",
        1003 => "Invalid JSON syntax in configuration",
        1004 => "Invalid TOML syntax in configuration",
        1005 => "Unsupported configuration file format",
        1006 => "Invalid value in configuration",

        2000 => "Generic setup error",
        2001 => "Column template missing for procedure",
        2002 => "Column template could not be parsed",
        2003 => "Identifier list could not be read",
        2004 => "Identifier list is empty",
        2005 => "Statement preparation failed",
        2006 => "Database connection failed",
        2007 => "Database backend not compiled in",
        2008 => "Spool file name shared by work items of different procedures",

        3000 => "Generic storage error",
        3001 => "IO operation failed",
        3002 => "Permission denied",
        3003 => "File or directory not found",
        3004 => "File already exists",
        3005 => "CSV read or write failed",

        4000 => "Generic execution error",
        4001 => "A worker task panicked",
        4002 => "Execution log sink failed",

        5000 => "Generic merge error",
        5001 => "Spool file discovery failed",
        5002 => "Spool file could not be read",

        _ => "Unknown error code",
    }
}
