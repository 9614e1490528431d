use serde::Serialize;

const GREEN: &str = "\x1b[32m";
const CYAN: &str = "\x1b[36m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";

macro_rules! env_or {
    ($key:literal, $default:literal) => {
        option_env!($key).unwrap_or($default)
    };
}

/// Build metadata baked in by `build.rs`, also served from `/v1/info`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    pub version: &'static str,
    pub build_time: &'static str,
    pub branch: &'static str,
    pub commit: &'static str,
    pub dirty: bool,
    pub profile: &'static str,
}

impl Default for BuildInfo {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            build_time: env_or!("BUILD_TIME", "unknown"),
            branch: env_or!("GIT_BRANCH", "unknown"),
            commit: env_or!("GIT_COMMIT_SHORT", "unknown"),
            dirty: matches!(option_env!("GIT_DIRTY"), Some("true")),
            profile: if cfg!(debug_assertions) {
                "debug"
            } else {
                "release"
            },
        }
    }
}

pub fn print_banner(info: &BuildInfo) {
    crate::log_println!();
    crate::log_println!("{GREEN} _   _       _ _                _             {RESET}");
    crate::log_println!("{GREEN}| | | | __ _| | | ___   _ _ __(_) ___  _ __  {RESET}");
    crate::log_println!("{GREEN}| | | |/ _` | | |/ / | | | '__| |/ _ \\| '_ \\ {RESET}");
    crate::log_println!("{GREEN} \\ V /| (_| | |   <| |_| | |  | | (_) | | | |{RESET}");
    crate::log_println!("{GREEN}  \\_/  \\__,_|_|_|\\_\\\\__, |_|  |_|\\___/|_| |_|{RESET}");
    crate::log_println!("{GREEN}                   |___/                     {RESET}");
    crate::log_println!("{DIM}=============================================={RESET}");
    crate::log_println!();

    let commit = if info.dirty {
        format!("{}{YELLOW} (dirty){RESET}", info.commit)
    } else {
        info.commit.to_owned()
    };

    print_row("Version", info.version, CYAN);
    print_row("Branch", info.branch, RESET);
    print_row("Commit", &commit, RESET);
    print_row("Profile", info.profile, YELLOW);
    crate::log_println!();
}

fn print_row(label: &str, value: &str, color: &str) {
    crate::log_println!("  {BOLD}{label:<10}{RESET}{color}{value}{RESET}");
}
