//! Environment readiness checks run before any mutation
//!
//! A blocked precondition stops the attempt in `Validating`. It is reported
//! and never retried automatically.

use std::path::{Path, PathBuf};

use crate::core::AccountId;
use crate::rotation::Flow;

/// Who asked for the rotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// Caller identity (operator name or service principal)
    pub id: String,
    /// Roles held on the remote platform
    pub roles: Vec<String>,
}

impl Caller {
    /// Caller with no roles
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roles: Vec::new(),
        }
    }

    /// Add a role
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Role check, case-insensitive like platform role names
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }
}

/// Input to a readiness check
#[derive(Debug, Clone)]
pub struct ValidationContext {
    /// Account about to be rotated
    pub account: AccountId,
    /// Flow requesting the rotation
    pub flow: Flow,
    /// Identity driving the flow
    pub caller: Caller,
}

/// Why the environment is not ready
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockedReason {
    /// A required executable is not on the search path
    #[error("required tool '{tool}' not found")]
    MissingTool { tool: String },

    /// Not enough free space to write a backup
    #[error("insufficient storage at {}: {available} bytes free, {required} required", path.display())]
    InsufficientStorage {
        path: PathBuf,
        available: u64,
        required: u64,
    },

    /// Caller may not change the account's credentials
    #[error("caller '{caller}' lacks required role '{required_role}'")]
    InsufficientPrivilege {
        caller: String,
        required_role: String,
    },
}

/// Outcome of a readiness check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Safe to proceed
    Ready,
    /// Must not proceed
    Blocked(BlockedReason),
}

impl Readiness {
    /// Whether the check passed
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Readiness check
///
/// Implementations must not have side effects.
pub trait PreconditionValidator: Send + Sync {
    /// Check the environment for `context`
    fn validate(&self, context: &ValidationContext) -> Readiness;
}

/// Checks against the local machine
///
/// By default nothing is required and every check passes; each requirement
/// is opted into with a builder method.
#[derive(Debug, Clone, Default)]
pub struct SystemPreconditions {
    required_tools: Vec<String>,
    search_path: Option<Vec<PathBuf>>,
    storage: Option<(PathBuf, u64)>,
    required_role: Option<String>,
}

impl SystemPreconditions {
    /// Nothing required
    pub fn new() -> Self {
        Self::default()
    }

    /// Require an executable on `PATH`
    pub fn require_tool(mut self, tool: impl Into<String>) -> Self {
        self.required_tools.push(tool.into());
        self
    }

    /// Search these directories instead of `PATH`
    pub fn with_search_path(mut self, dirs: Vec<PathBuf>) -> Self {
        self.search_path = Some(dirs);
        self
    }

    /// Require `min_free_bytes` available under `path`
    pub fn require_storage(mut self, path: impl Into<PathBuf>, min_free_bytes: u64) -> Self {
        self.storage = Some((path.into(), min_free_bytes));
        self
    }

    /// Require the caller to hold `role`
    pub fn require_role(mut self, role: impl Into<String>) -> Self {
        self.required_role = Some(role.into());
        self
    }

    fn search_dirs(&self) -> Vec<PathBuf> {
        match &self.search_path {
            Some(dirs) => dirs.clone(),
            None => std::env::var_os("PATH")
                .map(|path| std::env::split_paths(&path).collect())
                .unwrap_or_default(),
        }
    }

    fn tool_exists(dirs: &[PathBuf], tool: &str) -> bool {
        dirs.iter().any(|dir| {
            let candidate = dir.join(tool);
            candidate.is_file() || (cfg!(windows) && candidate.with_extension("exe").is_file())
        })
    }

    fn free_space(path: &Path) -> Option<u64> {
        // The directory may not exist yet on first run; measure its parent
        let mut candidate = Some(path);
        while let Some(dir) = candidate {
            if dir.exists() {
                return fs2::available_space(dir).ok();
            }
            candidate = dir.parent();
        }
        None
    }
}

impl PreconditionValidator for SystemPreconditions {
    fn validate(&self, context: &ValidationContext) -> Readiness {
        if let Some(role) = &self.required_role {
            if !context.caller.has_role(role) {
                return Readiness::Blocked(BlockedReason::InsufficientPrivilege {
                    caller: context.caller.id.clone(),
                    required_role: role.clone(),
                });
            }
        }

        if !self.required_tools.is_empty() {
            let dirs = self.search_dirs();
            if let Some(tool) = self
                .required_tools
                .iter()
                .find(|tool| !Self::tool_exists(&dirs, tool))
            {
                return Readiness::Blocked(BlockedReason::MissingTool { tool: tool.clone() });
            }
        }

        if let Some((path, required)) = &self.storage {
            let available = Self::free_space(path).unwrap_or(0);
            if available < *required {
                return Readiness::Blocked(BlockedReason::InsufficientStorage {
                    path: path.clone(),
                    available,
                    required: *required,
                });
            }
        }

        Readiness::Ready
    }
}
