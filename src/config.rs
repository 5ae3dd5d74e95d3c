//! Provisioner settings loaded via `ortho-config`, their validation, and the
//! immutable per-apply [`ProvisioningConfig`] derived from them.

use std::ffi::OsString;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::command::{DEFAULT_PILLAR_ROOT_DIR, DEFAULT_STATE_TREE_DIR, Elevation};

/// Default remote staging directory.
pub const DEFAULT_TEMP_CONFIG_DIR: &str = "/tmp/salt";
/// Default Terraform variables file merged into the grains.
pub const DEFAULT_TFVARS_FILE: &str = "terraform.tfvars";

/// User-facing provisioner options, merged from defaults, configuration files
/// and environment variables.
///
/// Boolean toggles are `skip_cli`: an absent clap flag would otherwise
/// serialise as `false` and mask file and environment values.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SALT_PROVISIONER",
    discovery(
        app_name = "salt-provisioner",
        env_var = "SALT_PROVISIONER_CONFIG_PATH",
        config_file_name = "salt-provisioner.toml",
        dotfile_name = ".salt-provisioner.toml",
        project_file_name = "salt-provisioner.toml"
    )
)]
#[expect(
    clippy::struct_excessive_bools,
    reason = "provisioner toggles are independent user-facing switches"
)]
pub struct ProvisionSettings {
    /// Local directory uploaded as the salt state tree. Required.
    #[ortho_config(default = String::new())]
    pub local_state_tree: String,
    /// Local directory uploaded as the pillar roots.
    pub local_pillar_roots: Option<String>,
    /// Remote state tree location; defaults to `/srv/salt`.
    pub remote_state_tree: Option<String>,
    /// Remote pillar roots location; defaults to `/srv/pillar`.
    pub remote_pillar_roots: Option<String>,
    /// Local minion config uploaded to `/etc/salt/minion`.
    pub minion_config_file: Option<String>,
    /// Remote staging directory for uploads.
    #[ortho_config(default = DEFAULT_TEMP_CONFIG_DIR.to_owned())]
    pub temp_config_dir: String,
    /// Skip downloading and running the salt bootstrap script.
    #[ortho_config(default = false, skip_cli)]
    pub skip_bootstrap: bool,
    /// Extra arguments passed to the bootstrap script.
    #[ortho_config(default = String::new())]
    pub bootstrap_args: String,
    /// Run privileged commands without `sudo`.
    #[ortho_config(default = false, skip_cli)]
    pub disable_sudo: bool,
    /// Password fed to `sudo -S`. Empty means passwordless sudo.
    #[ortho_config(default = String::new())]
    pub sudo_password: String,
    /// Single state to apply instead of the highstate.
    #[ortho_config(default = String::new())]
    pub custom_state: String,
    /// Extra arguments appended to the `salt-call` invocation.
    #[ortho_config(default = String::new())]
    pub cmd_args: String,
    /// Extra arguments appended to the `salt-call` invocation, before
    /// `cmd_args`.
    #[ortho_config(default = String::new())]
    pub salt_call_args: String,
    /// Log level passed to `salt-call -l`.
    #[ortho_config(default = "info".to_owned())]
    pub log_level: String,
    /// Do not pass `--retcode-passthrough` to `salt-call`.
    #[ortho_config(default = false, skip_cli)]
    pub no_exit_on_failure: bool,
    /// Upload provider state and Terraform variables as grains.
    #[ortho_config(default = true, skip_cli)]
    pub grains: bool,
    /// Terraform variables file merged into the grains.
    #[ortho_config(default = DEFAULT_TFVARS_FILE.to_owned())]
    pub tfvars: String,
    /// Pre-built grains file uploaded verbatim instead of the merged grains.
    pub local_grains_file: Option<String>,
}

/// Errors raised while loading settings from layered sources.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum SettingsLoadError {
    /// Indicates that parsing or merging configuration layers failed.
    #[error("provisioner configuration parsing failed: {0}")]
    Parse(String),
}

/// A single validation problem.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ValidationError {
    /// Raised when a required field is empty.
    #[error("{field} cannot be empty")]
    Missing {
        /// Offending option name.
        field: &'static str,
    },
    /// Raised when a path cannot be inspected.
    #[error("{field}: path '{path}' is invalid: {message}")]
    InvalidPath {
        /// Offending option name.
        field: &'static str,
        /// Configured path.
        path: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a directory option points at something else.
    #[error("{field}: path '{path}' must point to a directory")]
    NotADirectory {
        /// Offending option name.
        field: &'static str,
        /// Configured path.
        path: String,
    },
    /// Raised when a file option points at a directory.
    #[error("{field}: path '{path}' must point to a file")]
    NotAFile {
        /// Offending option name.
        field: &'static str,
        /// Configured path.
        path: String,
    },
    /// Raised when remote roots are combined with a minion config.
    #[error(
        "remote_state_tree and remote_pillar_roots only apply when minion_config_file is not used"
    )]
    ConflictingRoots,
}

/// Every problem found while validating [`ProvisionSettings`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{}", render_problems(.0))]
pub struct ValidationErrors(pub Vec<ValidationError>);

fn render_problems(problems: &[ValidationError]) -> String {
    problems
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Clone, Copy)]
enum PathKind {
    Directory,
    File,
}

impl ProvisionSettings {
    /// Loads settings from defaults, configuration files, and environment
    /// variables without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsLoadError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, SettingsLoadError> {
        Self::load_from_iter([OsString::from("salt-provisioner")])
            .map_err(|err| SettingsLoadError::Parse(err.to_string()))
    }

    /// Checks paths and option combinations, reporting every problem found.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationErrors`] listing each invalid option.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        let mut problems = Vec::new();

        let required = Some(self.local_state_tree.as_str());
        if let Err(problem) =
            check_path(required, "local_state_tree", PathKind::Directory, true)
        {
            problems.push(problem);
        }

        let optional_paths = [
            (
                self.local_pillar_roots.as_deref(),
                "local_pillar_roots",
                PathKind::Directory,
            ),
            (
                self.minion_config_file.as_deref(),
                "minion_config_file",
                PathKind::File,
            ),
            (
                self.local_grains_file.as_deref(),
                "local_grains_file",
                PathKind::File,
            ),
        ];
        for (value, field, kind) in optional_paths {
            if let Err(problem) = check_path(value, field, kind, false) {
                problems.push(problem);
            }
        }

        if non_empty(self.minion_config_file.as_deref()).is_some()
            && (non_empty(self.remote_state_tree.as_deref()).is_some()
                || non_empty(self.remote_pillar_roots.as_deref()).is_some())
        {
            problems.push(ValidationError::ConflictingRoots);
        }

        if self.temp_config_dir.trim().is_empty() {
            problems.push(ValidationError::Missing {
                field: "temp_config_dir",
            });
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors(problems))
        }
    }

    /// Validates the settings and freezes them into a [`ProvisioningConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ValidationErrors`] when [`ProvisionSettings::validate`]
    /// fails.
    pub fn to_config(&self) -> Result<ProvisioningConfig, ValidationErrors> {
        self.validate()?;
        Ok(ProvisioningConfig {
            local_state_tree: Utf8PathBuf::from(&self.local_state_tree),
            local_pillar_roots: non_empty(self.local_pillar_roots.as_deref()).map(Utf8PathBuf::from),
            minion_config: non_empty(self.minion_config_file.as_deref()).map(Utf8PathBuf::from),
            remote_state_tree: non_empty(self.remote_state_tree.as_deref()).map(str::to_owned),
            remote_pillar_roots: non_empty(self.remote_pillar_roots.as_deref())
                .map(str::to_owned),
            temp_config_dir: self.temp_config_dir.clone(),
            skip_bootstrap: self.skip_bootstrap,
            bootstrap_args: self.bootstrap_args.clone(),
            elevation: Elevation::from_settings(self.disable_sudo, &self.sudo_password),
            custom_state: self.custom_state.trim().to_owned(),
            log_level: self.log_level.trim().to_owned(),
            salt_call_args: self.salt_call_args.clone(),
            cmd_args: self.cmd_args.clone(),
            no_exit_on_failure: self.no_exit_on_failure,
            grains: self.grains,
            tfvars: Utf8PathBuf::from(&self.tfvars),
            local_grains_file: non_empty(self.local_grains_file.as_deref()).map(Utf8PathBuf::from),
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|text| !text.trim().is_empty())
}

fn check_path(
    value: Option<&str>,
    field: &'static str,
    kind: PathKind,
    required: bool,
) -> Result<(), ValidationError> {
    let Some(path) = non_empty(value) else {
        return if required {
            Err(ValidationError::Missing { field })
        } else {
            Ok(())
        };
    };

    let metadata = Utf8Path::new(path)
        .metadata()
        .map_err(|err: io::Error| ValidationError::InvalidPath {
            field,
            path: path.to_owned(),
            message: err.to_string(),
        })?;

    match kind {
        PathKind::Directory if !metadata.is_dir() => Err(ValidationError::NotADirectory {
            field,
            path: path.to_owned(),
        }),
        PathKind::File if metadata.is_dir() => Err(ValidationError::NotAFile {
            field,
            path: path.to_owned(),
        }),
        _ => Ok(()),
    }
}

/// Immutable snapshot of every option for one apply.
#[derive(Clone, Debug, Eq, PartialEq)]
#[expect(
    clippy::struct_excessive_bools,
    reason = "mirrors the independent user-facing switches"
)]
pub struct ProvisioningConfig {
    /// Local salt state tree.
    pub local_state_tree: Utf8PathBuf,
    /// Local pillar roots, when pillar data is uploaded.
    pub local_pillar_roots: Option<Utf8PathBuf>,
    /// Local minion config; enables minion-config mode.
    pub minion_config: Option<Utf8PathBuf>,
    /// Remote state tree override.
    pub remote_state_tree: Option<String>,
    /// Remote pillar roots override.
    pub remote_pillar_roots: Option<String>,
    /// Remote staging directory.
    pub temp_config_dir: String,
    /// Whether the bootstrap stage is skipped.
    pub skip_bootstrap: bool,
    /// Arguments passed to the bootstrap script.
    pub bootstrap_args: String,
    /// Wrapping applied to privileged commands.
    pub elevation: Elevation,
    /// State name for `state.sls`; empty runs the highstate.
    pub custom_state: String,
    /// `salt-call` log level; empty means `info`.
    pub log_level: String,
    /// Extra `salt-call` arguments.
    pub salt_call_args: String,
    /// More extra `salt-call` arguments, appended last.
    pub cmd_args: String,
    /// Whether `--retcode-passthrough` is omitted.
    pub no_exit_on_failure: bool,
    /// Whether grains are uploaded.
    pub grains: bool,
    /// Terraform variables file merged into the grains.
    pub tfvars: Utf8PathBuf,
    /// Pre-built grains file uploaded instead of merged grains.
    pub local_grains_file: Option<Utf8PathBuf>,
}

impl ProvisioningConfig {
    /// Builds a configuration with default options for `local_state_tree`.
    #[must_use]
    pub fn for_state_tree(local_state_tree: impl Into<Utf8PathBuf>) -> Self {
        Self {
            local_state_tree: local_state_tree.into(),
            local_pillar_roots: None,
            minion_config: None,
            remote_state_tree: None,
            remote_pillar_roots: None,
            temp_config_dir: DEFAULT_TEMP_CONFIG_DIR.to_owned(),
            skip_bootstrap: false,
            bootstrap_args: String::new(),
            elevation: Elevation::Sudo,
            custom_state: String::new(),
            log_level: String::from("info"),
            salt_call_args: String::new(),
            cmd_args: String::new(),
            no_exit_on_failure: false,
            grains: true,
            tfvars: Utf8PathBuf::from(DEFAULT_TFVARS_FILE),
            local_grains_file: None,
        }
    }

    /// Remote directory that receives the state tree.
    #[must_use]
    pub fn remote_state_tree_dir(&self) -> &str {
        self.remote_state_tree
            .as_deref()
            .filter(|dir| !dir.is_empty())
            .unwrap_or(DEFAULT_STATE_TREE_DIR)
    }

    /// Remote directory that receives the pillar roots.
    #[must_use]
    pub fn remote_pillar_roots_dir(&self) -> &str {
        self.remote_pillar_roots
            .as_deref()
            .filter(|dir| !dir.is_empty())
            .unwrap_or(DEFAULT_PILLAR_ROOT_DIR)
    }

    /// Path of `name` inside the remote staging directory.
    #[must_use]
    pub fn staging_path(&self, name: &str) -> String {
        format!("{}/{name}", self.temp_config_dir.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;
    use crate::test_helpers::EnvGuard;

    struct Fixture {
        settings: ProvisionSettings,
        root: Utf8PathBuf,
        _tmp: TempDir,
    }

    #[fixture]
    fn fixture() -> Fixture {
        let tmp = TempDir::new().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).expect("utf8 tempdir");
        fs::create_dir(root.join("states")).expect("create states");
        fs::create_dir(root.join("pillar")).expect("create pillar");
        fs::write(root.join("minion"), "file_client: local\n").expect("write minion");

        let settings = ProvisionSettings {
            local_state_tree: root.join("states").into_string(),
            local_pillar_roots: None,
            remote_state_tree: None,
            remote_pillar_roots: None,
            minion_config_file: None,
            temp_config_dir: String::from(DEFAULT_TEMP_CONFIG_DIR),
            skip_bootstrap: false,
            bootstrap_args: String::new(),
            disable_sudo: false,
            sudo_password: String::new(),
            custom_state: String::new(),
            cmd_args: String::new(),
            salt_call_args: String::new(),
            log_level: String::from("info"),
            no_exit_on_failure: false,
            grains: true,
            tfvars: String::from(DEFAULT_TFVARS_FILE),
            local_grains_file: None,
        };

        Fixture {
            settings,
            root,
            _tmp: tmp,
        }
    }

    #[rstest]
    fn valid_settings_produce_config(fixture: Fixture) {
        let config = fixture.settings.to_config().expect("settings should validate");

        assert_eq!(config.local_state_tree, fixture.root.join("states"));
        assert_eq!(config.elevation, Elevation::Sudo);
        assert_eq!(config.remote_state_tree_dir(), "/srv/salt");
        assert_eq!(config.remote_pillar_roots_dir(), "/srv/pillar");
        assert_eq!(config.staging_path("states"), "/tmp/salt/states");
    }

    #[rstest]
    fn missing_state_tree_is_reported(fixture: Fixture) {
        let settings = ProvisionSettings {
            local_state_tree: String::new(),
            ..fixture.settings
        };

        let errors = settings.validate().expect_err("state tree is required");

        assert_eq!(
            errors.0,
            vec![ValidationError::Missing {
                field: "local_state_tree"
            }]
        );
        assert_eq!(errors.to_string(), "local_state_tree cannot be empty");
    }

    #[rstest]
    fn state_tree_must_be_a_directory(fixture: Fixture) {
        let settings = ProvisionSettings {
            local_state_tree: fixture.root.join("minion").into_string(),
            ..fixture.settings
        };

        let errors = settings.validate().expect_err("file is not a directory");

        assert!(matches!(
            errors.0.as_slice(),
            [ValidationError::NotADirectory {
                field: "local_state_tree",
                ..
            }]
        ));
    }

    #[rstest]
    fn nonexistent_pillar_roots_are_invalid(fixture: Fixture) {
        let settings = ProvisionSettings {
            local_pillar_roots: Some(fixture.root.join("missing").into_string()),
            ..fixture.settings
        };

        let errors = settings.validate().expect_err("missing pillar dir");

        assert!(matches!(
            errors.0.as_slice(),
            [ValidationError::InvalidPath {
                field: "local_pillar_roots",
                ..
            }]
        ));
    }

    #[rstest]
    fn minion_config_must_be_a_file(fixture: Fixture) {
        let settings = ProvisionSettings {
            minion_config_file: Some(fixture.root.join("pillar").into_string()),
            ..fixture.settings
        };

        let errors = settings.validate().expect_err("directory is not a file");

        assert!(matches!(
            errors.0.as_slice(),
            [ValidationError::NotAFile {
                field: "minion_config_file",
                ..
            }]
        ));
    }

    #[rstest]
    #[case(Some("/srv/custom"), None)]
    #[case(None, Some("/srv/custom-pillar"))]
    fn minion_config_conflicts_with_remote_roots(
        fixture: Fixture,
        #[case] remote_state_tree: Option<&str>,
        #[case] remote_pillar_roots: Option<&str>,
    ) {
        let settings = ProvisionSettings {
            minion_config_file: Some(fixture.root.join("minion").into_string()),
            remote_state_tree: remote_state_tree.map(str::to_owned),
            remote_pillar_roots: remote_pillar_roots.map(str::to_owned),
            ..fixture.settings
        };

        let errors = settings.validate().expect_err("conflicting addressing modes");

        assert_eq!(errors.0, vec![ValidationError::ConflictingRoots]);
    }

    #[rstest]
    fn every_problem_is_collected(fixture: Fixture) {
        let settings = ProvisionSettings {
            local_state_tree: String::new(),
            local_pillar_roots: Some(fixture.root.join("missing").into_string()),
            minion_config_file: Some(fixture.root.join("pillar").into_string()),
            remote_state_tree: Some(String::from("/srv/custom")),
            ..fixture.settings
        };

        let errors = settings.validate().expect_err("several problems");

        assert_eq!(errors.0.len(), 4, "{errors}");
    }

    #[rstest]
    fn empty_optional_strings_are_treated_as_unset(fixture: Fixture) {
        let settings = ProvisionSettings {
            local_pillar_roots: Some(String::new()),
            minion_config_file: Some(String::from("  ")),
            remote_state_tree: Some(String::new()),
            ..fixture.settings
        };

        let config = settings.to_config().expect("blank options are unset");

        assert_eq!(config.local_pillar_roots, None);
        assert_eq!(config.minion_config, None);
        assert_eq!(config.remote_state_tree, None);
    }

    #[rstest]
    fn sudo_password_selects_password_elevation(fixture: Fixture) {
        let settings = ProvisionSettings {
            sudo_password: String::from("pw"),
            ..fixture.settings
        };

        let config = settings.to_config().expect("valid");

        assert_eq!(
            config.elevation,
            Elevation::SudoWithPassword(String::from("pw"))
        );
    }

    #[test]
    fn staging_path_ignores_trailing_separator() {
        let config = ProvisioningConfig {
            temp_config_dir: String::from("/tmp/stage/"),
            ..ProvisioningConfig::for_state_tree("/states")
        };

        assert_eq!(config.staging_path("grains"), "/tmp/stage/grains");
    }

    #[tokio::test]
    async fn environment_overrides_defaults() {
        let _guard = EnvGuard::set_vars(&[
            ("SALT_PROVISIONER_LOCAL_STATE_TREE", "/srv/states"),
            ("SALT_PROVISIONER_CUSTOM_STATE", "webserver"),
            ("SALT_PROVISIONER_SKIP_BOOTSTRAP", "true"),
        ])
        .await;

        let settings =
            ProvisionSettings::load_without_cli_args().expect("settings should load from env");

        assert_eq!(settings.local_state_tree, "/srv/states");
        assert_eq!(settings.custom_state, "webserver");
        assert!(settings.skip_bootstrap);
        assert_eq!(settings.temp_config_dir, DEFAULT_TEMP_CONFIG_DIR);
        assert!(settings.grains);
    }

    #[tokio::test]
    async fn toggles_load_from_environment() {
        let _guard = EnvGuard::set_vars(&[
            ("SALT_PROVISIONER_DISABLE_SUDO", "true"),
            ("SALT_PROVISIONER_NO_EXIT_ON_FAILURE", "true"),
            ("SALT_PROVISIONER_GRAINS", "false"),
        ])
        .await;

        let settings =
            ProvisionSettings::load_without_cli_args().expect("settings should load from env");

        assert!(settings.disable_sudo);
        assert!(settings.no_exit_on_failure);
        assert!(!settings.grains);
        assert!(!settings.skip_bootstrap);
    }

    #[tokio::test]
    async fn toggles_load_from_config_file() {
        let tmp = TempDir::new().expect("tempdir");
        let path = tmp.path().join("salt-provisioner.toml");
        fs::write(
            &path,
            concat!(
                "local_state_tree = \"/srv/states\"\n",
                "skip_bootstrap = true\n",
                "disable_sudo = true\n",
                "no_exit_on_failure = true\n",
                "grains = false\n",
                "log_level = \"debug\"\n",
            ),
        )
        .expect("write config file");
        let config_path = path.to_str().expect("utf8 config path");
        let _guard = EnvGuard::set_vars(&[("SALT_PROVISIONER_CONFIG_PATH", config_path)]).await;

        let settings =
            ProvisionSettings::load_without_cli_args().expect("settings should load from file");

        assert!(settings.skip_bootstrap);
        assert!(settings.disable_sudo);
        assert!(settings.no_exit_on_failure);
        assert!(!settings.grains);
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.local_state_tree, "/srv/states");
    }
}
