use voxpipe_core::{
    CredentialSource, EnvCredentials, KeychainCredentials, StaticCredentials, VoxError,
};

#[tokio::test]
async fn env_credentials_trim_token() {
    std::env::set_var("VOXPIPE_TEST_ENV_KEY", "  sk-from-env\n");
    let creds = EnvCredentials::new("VOXPIPE_TEST_ENV_KEY");
    assert_eq!(creds.token().await.unwrap(), "sk-from-env");
    assert_eq!(creds.describe(), "env VOXPIPE_TEST_ENV_KEY");
}

#[tokio::test]
async fn env_credentials_missing_or_empty_is_error() {
    let missing = EnvCredentials::new("VOXPIPE_TEST_ENV_KEY_MISSING");
    assert!(matches!(missing.token().await, Err(VoxError::Credentials(_))));

    std::env::set_var("VOXPIPE_TEST_ENV_KEY_EMPTY", "   ");
    let empty = EnvCredentials::new("VOXPIPE_TEST_ENV_KEY_EMPTY");
    assert!(matches!(empty.token().await, Err(VoxError::Credentials(_))));
}

#[tokio::test]
async fn static_credentials_hide_token_in_debug() {
    let creds = StaticCredentials::new("sk-secret");
    assert_eq!(creds.token().await.unwrap(), "sk-secret");
    assert!(!format!("{creds:?}").contains("sk-secret"));
}

#[tokio::test]
async fn keychain_missing_tool_is_error() {
    let mut creds = KeychainCredentials::new("OpenAI_API_Key", "bmf");
    creds.security_bin = "/nonexistent/security".into();
    let err = creds.token().await.unwrap_err();
    assert!(matches!(err, VoxError::Credentials(_)), "{err}");
}

#[cfg(unix)]
mod unix {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    fn script(name: &str, body: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("voxpipe-creds-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn keychain_reads_password_from_tool() {
        // Echo the args back so the lookup shape is visible in the token
        let bin = script("security-ok", r#"echo "$1|$2|$3|$4|$5|$6""#);
        let mut creds = KeychainCredentials::new("OpenAI_API_Key", "bmf");
        creds.security_bin = bin;
        assert_eq!(
            creds.token().await.unwrap(),
            "find-generic-password|-a|bmf|-s|OpenAI_API_Key|-w"
        );
    }

    #[tokio::test]
    async fn keychain_non_zero_exit_is_error() {
        let bin = script(
            "security-fail",
            "echo 'The specified item could not be found.' >&2; exit 44",
        );
        let mut creds = KeychainCredentials::new("OpenAI_API_Key", "bmf");
        creds.security_bin = bin;
        let err = creds.token().await.unwrap_err();
        assert!(err.to_string().contains("could not be found"), "{err}");
    }
}
