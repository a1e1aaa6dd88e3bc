//! Registry credential lookup through `Settings`.

use std::fs;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ephemera::auth::{normalize_registry, registry_from_image, RegistryAuth, DOCKER_HUB};
use ephemera::{AuthError, Settings};
use tempfile::TempDir;

#[test]
fn test_docker_hub_aliases_share_one_key() {
    for key in [
        "docker.io",
        "index.docker.io",
        "https://index.docker.io/v1/",
        "registry-1.docker.io",
    ] {
        assert_eq!(normalize_registry(key), DOCKER_HUB, "{key}");
    }
    assert_eq!(normalize_registry("https://ghcr.io/"), "ghcr.io");
}

#[test]
fn test_registry_from_image() {
    assert_eq!(registry_from_image("redis:7"), DOCKER_HUB);
    assert_eq!(registry_from_image("library/redis"), DOCKER_HUB);
    assert_eq!(registry_from_image("ghcr.io/org/app:1"), "ghcr.io");
    assert_eq!(registry_from_image("localhost:5000/app"), "localhost:5000");
}

#[tokio::test]
async fn test_inline_config_wins_over_file() {
    let home = TempDir::new().unwrap();
    fs::create_dir_all(home.path().join(".docker")).unwrap();
    fs::write(
        home.path().join(".docker/config.json"),
        r#"{"auths": {"ghcr.io": {"username": "file", "password": "file"}}}"#,
    )
    .unwrap();

    let encoded = STANDARD.encode("inline-user:inline-pass");
    let settings = Settings::default()
        .with_home_dir(home.path())
        .with_auth_config(format!(r#"{{"auths": {{"ghcr.io": {{"auth": "{encoded}"}}}}}}"#));

    let auth = RegistryAuth::load(&settings).unwrap();
    let credentials = auth
        .credentials_for_image("ghcr.io/org/app:1")
        .await
        .unwrap()
        .expect("credentials");
    assert_eq!(credentials.username, "inline-user");
    assert_eq!(credentials.password, "inline-pass");
}

#[tokio::test]
async fn test_home_file_used_without_inline_config() {
    let home = TempDir::new().unwrap();
    fs::create_dir_all(home.path().join(".docker")).unwrap();
    let encoded = STANDARD.encode("hub-user:hub-pass");
    fs::write(
        home.path().join(".docker/config.json"),
        format!(r#"{{"auths": {{"https://index.docker.io/v1/": {{"auth": "{encoded}"}}}}}}"#),
    )
    .unwrap();

    let settings = Settings::default().with_home_dir(home.path());
    let auth = RegistryAuth::load(&settings).unwrap();
    let credentials = auth
        .credentials_for_image("postgres:16")
        .await
        .unwrap()
        .expect("credentials");
    assert_eq!(credentials.registry, DOCKER_HUB);
    assert_eq!(credentials.username, "hub-user");
}

#[tokio::test]
async fn test_no_document_means_no_credentials() {
    let home = TempDir::new().unwrap();
    let settings = Settings::default().with_home_dir(home.path());
    let auth = RegistryAuth::load(&settings).unwrap();
    assert!(auth.credentials_for("ghcr.io").await.unwrap().is_none());
}

#[test]
fn test_malformed_inline_config_rejected() {
    let settings = Settings::default().with_auth_config("{not json");
    assert!(matches!(
        RegistryAuth::load(&settings),
        Err(AuthError::InvalidConfig(_))
    ));
}
