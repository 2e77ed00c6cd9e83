//! Install configuration and the dev/prod dependency filter.

use std::path::PathBuf;

use burrow_types::DepNode;

/// Configuration for an install run.
#[derive(Debug, Clone)]
pub struct InstallOptions {
    /// Path to the root of the content-addressed store.
    pub cache: PathBuf,

    /// When false, cached package metadata is reused when present instead of
    /// re-unpacking the tarball.
    pub restore: bool,

    /// The install prefix. Defaults to the current directory.
    pub prefix: Option<PathBuf>,

    /// Install into the global prefix layout.
    pub global: bool,

    /// Include development dependencies.
    pub dev: bool,

    /// Alias of `dev`.
    pub development: bool,

    /// Exclude development dependencies.
    pub production: bool,

    /// Restrict installation to one dependency class
    /// (`dev[elopment]`/`prod[uction]`).
    pub only: Option<String>,

    /// Additionally include one dependency class.
    pub also: Option<String>,

    /// Passed through to external collaborators.
    pub force: bool,

    /// Skip the lifecycle-script stage.
    pub ignore_scripts: bool,
}

impl InstallOptions {
    /// Creates options with the required store path; everything else takes
    /// its default.
    pub fn new(cache: impl Into<PathBuf>) -> Self {
        Self {
            cache: cache.into(),
            restore: true,
            prefix: None,
            global: false,
            dev: false,
            development: false,
            production: false,
            only: None,
            also: None,
            force: false,
            ignore_scripts: false,
        }
    }

    /// Sets the install prefix.
    #[must_use]
    pub fn with_prefix(self, prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..self
        }
    }

    /// Sets whether cached package metadata may be reused.
    #[must_use]
    pub fn with_restore(self, restore: bool) -> Self {
        Self { restore, ..self }
    }

    /// Excludes development dependencies.
    #[must_use]
    pub fn with_production(self, production: bool) -> Self {
        Self { production, ..self }
    }

    /// Restricts installation to one dependency class.
    #[must_use]
    pub fn with_only(self, only: impl Into<String>) -> Self {
        Self {
            only: Some(only.into()),
            ..self
        }
    }

    /// Additionally includes one dependency class.
    #[must_use]
    pub fn with_also(self, also: impl Into<String>) -> Self {
        Self {
            also: Some(also.into()),
            ..self
        }
    }

    /// Skips the lifecycle-script stage.
    #[must_use]
    pub fn with_ignore_scripts(self, ignore_scripts: bool) -> Self {
        Self {
            ignore_scripts,
            ..self
        }
    }

    /// Whether development dependencies are included in this run.
    pub fn include_dev(&self) -> bool {
        self.dev
            || self.development
            || (!matches_prod(self.only.as_deref()) && !self.production)
            || matches_dev(self.only.as_deref())
            || matches_dev(self.also.as_deref())
    }

    /// Whether production dependencies are included in this run.
    pub fn include_prod(&self) -> bool {
        !matches_dev(self.only.as_deref())
    }

    /// Applies the dev/prod filter to a dependency node.
    pub fn include_dep(&self, node: &DepNode) -> bool {
        if node.dev {
            self.include_dev()
        } else {
            self.include_prod()
        }
    }
}

fn matches_dev(value: Option<&str>) -> bool {
    matches!(value, Some("dev") | Some("development"))
}

fn matches_prod(value: Option<&str>) -> bool {
    matches!(value, Some("prod") | Some("production"))
}
