use std::env;
use std::path::PathBuf;

fn fallback_dotenv_path(recsync_home: Option<PathBuf>, home_dir: Option<PathBuf>) -> Option<PathBuf> {
    match (recsync_home, home_dir) {
        (Some(base), _) => Some(base.join(".env")),
        (None, Some(home)) => Some(home.join(".recsync/.env")),
        (None, None) => None,
    }
}

pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let fallback = fallback_dotenv_path(
        env::var_os("RECSYNC_HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from),
        dirs::home_dir(),
    );

    let Some(path) = fallback else {
        return;
    };
    if path.is_file() {
        let _ = dotenvy::from_path(&path);
    }
}
