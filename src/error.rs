//! # Typed Store Errors
//!
//! Most failures are reported as plain `eyre` reports with context attached.
//! The conditions below are fatal to the enclosing operation and callers may
//! need to tell them apart, so they travel as a typed error inside the report:
//!
//! ```ignore
//! match cache.put(row) {
//!     Err(e) if matches!(e.downcast_ref::<StoreError>(), Some(StoreError::CacheFull { .. })) => {
//!         // every resident row is pinned or dirty
//!     }
//!     other => other?,
//! }
//! ```

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Neither cleanup pass could make room for an incoming row.
    CacheFull { rows: usize, bytes: u64 },
    /// Data file consistency violation.
    DataFile { message: String },
    /// Allocation of an in-memory table failed.
    OutOfMemory { requested: usize },
}

impl StoreError {
    pub fn data_file(message: impl Into<String>) -> Self {
        StoreError::DataFile {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::CacheFull { rows, bytes } => write!(
                f,
                "data cache is full: {} rows resident, {} bytes resident",
                rows, bytes
            ),
            StoreError::DataFile { message } => write!(f, "data file error: {}", message),
            StoreError::OutOfMemory { requested } => write!(
                f,
                "out of memory: failed to allocate {} bytes",
                requested
            ),
        }
    }
}

impl std::error::Error for StoreError {}

/// Returns the typed error carried by `report`, if any.
pub fn store_error(report: &eyre::Report) -> Option<&StoreError> {
    report.downcast_ref::<StoreError>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_error_survives_eyre_context() {
        use eyre::WrapErr;

        let result: eyre::Result<()> =
            Err(StoreError::data_file("root 42 not found")).wrap_err("defrag failed");
        let report = result.unwrap_err();

        assert_eq!(
            store_error(&report),
            Some(&StoreError::data_file("root 42 not found"))
        );
    }

    #[test]
    fn out_of_memory_reports_requested_size() {
        let err = StoreError::OutOfMemory { requested: 4096 };
        assert!(err.to_string().contains("4096"));
    }
}
