use serde::{Deserialize, Serialize};

use super::ModelError;

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(ModelError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(Split {
    Train => "train",
    Val => "val",
    Test => "test",
    Unknown => "unknown",
});

str_enum!(UnitScope {
    PerSample => "per_sample",
    Dataset => "dataset",
});

str_enum!(UnitKind {
    Check => "check",
    Feature => "feature",
});

str_enum!(UnitCost {
    Light => "light",
    Heavy => "heavy",
});

str_enum!(CacheAccess {
    ReadOnly => "read_only",
    ReadsCache => "reads_cache",
});

str_enum!(ResultKind {
    Scalar => "scalar",
    Table => "table",
    Histogram => "histogram",
    Matrix => "matrix",
    SampleList => "sample_list",
});

str_enum!(SummaryLevel {
    Pass => "pass",
    Warn => "warn",
    Fail => "fail",
});

str_enum!(AuditState {
    Idle => "idle",
    Scanning => "scanning",
    Executing => "executing",
    Aggregating => "aggregating",
    Done => "done",
    Failed => "failed",
});

str_enum!(ExitStatus {
    Success => "success",
    PartialSuccess => "partial_success",
    Failure => "failure",
});

impl ExitStatus {
    /// Process exit code for the binary.
    pub fn code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failure => 1,
            Self::PartialSuccess => 2,
        }
    }
}

impl Split {
    /// Classify a single directory name. Returns `None` for names that carry
    /// no split meaning.
    pub fn from_dir_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "train" | "training" => Some(Self::Train),
            "val" | "valid" | "validation" => Some(Self::Val),
            "test" | "testing" => Some(Self::Test),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn split_round_trips_through_str() {
        for split in [Split::Train, Split::Val, Split::Test, Split::Unknown] {
            assert_eq!(Split::from_str(split.as_str()).unwrap(), split);
        }
    }

    #[test]
    fn unknown_value_is_rejected() {
        let err = UnitScope::from_str("global").unwrap_err();
        assert!(err.to_string().contains("UnitScope"));
    }

    #[test]
    fn split_from_dir_name_accepts_aliases() {
        assert_eq!(Split::from_dir_name("Training"), Some(Split::Train));
        assert_eq!(Split::from_dir_name("valid"), Some(Split::Val));
        assert_eq!(Split::from_dir_name("TEST"), Some(Split::Test));
        assert_eq!(Split::from_dir_name("images"), None);
    }

    #[test]
    fn summary_levels_are_ordered_by_severity() {
        assert!(SummaryLevel::Pass < SummaryLevel::Warn);
        assert!(SummaryLevel::Warn < SummaryLevel::Fail);
    }

    #[test]
    fn exit_codes() {
        assert_eq!(ExitStatus::Success.code(), 0);
        assert_eq!(ExitStatus::Failure.code(), 1);
        assert_eq!(ExitStatus::PartialSuccess.code(), 2);
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&ResultKind::SampleList).unwrap();
        assert_eq!(json, "\"sample_list\"");
    }
}
