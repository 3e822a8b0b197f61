use std::env;
use std::path::PathBuf;

fn fallback_dotenv_path(
    archiver_home: Option<PathBuf>,
    home_dir: Option<PathBuf>,
) -> Option<PathBuf> {
    let base = archiver_home.or(home_dir)?;
    Some(base.join("archiver/.env"))
}

/// Load `.env` from the working directory, falling back to
/// `$ARCHIVER_HOME/archiver/.env` or `~/archiver/.env`.
pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let fallback = fallback_dotenv_path(
        env::var_os("ARCHIVER_HOME").map(PathBuf::from),
        dirs::home_dir(),
    );

    let Some(path) = fallback else {
        return;
    };
    if path.is_file() {
        let _ = dotenvy::from_path(&path);
    }
}

#[cfg(test)]
mod tests {
    use super::fallback_dotenv_path;
    use std::path::PathBuf;

    #[test]
    fn fallback_prefers_archiver_home() {
        let got = fallback_dotenv_path(
            Some(PathBuf::from("/srv/archiver-home")),
            Some(PathBuf::from("/home/operator")),
        );
        assert_eq!(got, Some(PathBuf::from("/srv/archiver-home/archiver/.env")));
    }

    #[test]
    fn fallback_uses_home_when_archiver_home_unset() {
        let got = fallback_dotenv_path(None, Some(PathBuf::from("/home/operator")));
        assert_eq!(got, Some(PathBuf::from("/home/operator/archiver/.env")));
    }

    #[test]
    fn no_fallback_without_any_home() {
        assert_eq!(fallback_dotenv_path(None, None), None);
    }
}
