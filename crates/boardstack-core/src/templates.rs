//! nginx and compose file generation.

use crate::config::{DatabaseCredentials, StackLayout, DATABASE_DIR, FORUM_DIR, PROXY_DIR};
use crate::error::Result;
use std::path::PathBuf;

/// nginx server block serving MyBB through PHP-FPM on the `mybb` service.
const PROXY_CONFIG: &str = r#"server {
    listen 80;
    server_name localhost;

    root /var/www/html;
    index index.php index.html index.htm;

    location / {
        try_files $uri $uri/ /index.php?$query_string;
    }

    location ~ \.php$ {
        include fastcgi_params;
        fastcgi_pass mybb:9000;
        fastcgi_param SCRIPT_FILENAME $document_root$fastcgi_script_name;
        fastcgi_index index.php;
    }

    location ~ /\.ht {
        deny all;
    }
}
"#;

/// Inputs that vary between composition documents.
#[derive(Debug, Clone, Copy)]
pub struct CompositionParams<'a> {
    /// Registry host prefixed to every image.
    pub mirror: &'a str,
    /// Host port published for nginx.
    pub port: u16,
    /// Database settings passed to the MySQL image.
    pub credentials: &'a DatabaseCredentials,
}

/// Render the nginx configuration.
pub fn render_proxy_config() -> String {
    PROXY_CONFIG.to_string()
}

/// Double-quoted YAML scalar for an arbitrary string. A JSON string literal
/// is valid YAML and escapes quotes, backslashes and control characters.
fn yaml_string(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

/// Render the composition document for one mirror and port.
pub fn render_composition(params: &CompositionParams<'_>) -> String {
    let CompositionParams {
        mirror,
        port,
        credentials,
    } = *params;

    format!(
        r#"version: '3.8'

services:
  mybb:
    image: {mirror}/mybb/mybb:latest
    volumes:
      - ./{FORUM_DIR}:/var/www/html:rw

  nginx:
    image: {mirror}/library/nginx:mainline-alpine
    ports:
      - "{port}:80"
    volumes:
      - ./{PROXY_DIR}:/etc/nginx/conf.d:ro
      - ./{FORUM_DIR}:/var/www/html:ro

  mysql:
    image: {mirror}/library/mysql:8.0
    environment:
      MYSQL_ROOT_PASSWORD: {root_password}
      MYSQL_DATABASE: {database}
      MYSQL_USER: {user}
      MYSQL_PASSWORD: {password}
    command: --default-authentication-plugin=mysql_native_password
    volumes:
      - ./{DATABASE_DIR}:/var/lib/mysql:rw
"#,
        root_password = yaml_string(&credentials.root_password),
        database = yaml_string(&credentials.database),
        user = yaml_string(&credentials.user),
        password = yaml_string(&credentials.password),
    )
}

/// Create the forum, proxy and database directories.
pub async fn create_directories(layout: &StackLayout) -> Result<()> {
    for dir in [layout.forum_dir(), layout.proxy_dir(), layout.database_dir()] {
        tokio::fs::create_dir_all(&dir).await?;
        tracing::debug!(dir = %dir.display(), "Ensured directory");
    }
    Ok(())
}

/// Write the nginx configuration, replacing any previous file.
pub async fn write_proxy_config(layout: &StackLayout) -> Result<PathBuf> {
    let path = layout.proxy_config();
    tokio::fs::write(&path, render_proxy_config()).await?;
    tracing::info!(path = %path.display(), "Wrote proxy configuration");
    Ok(path)
}

/// Write the composition document, replacing any previous file.
pub async fn write_composition(
    layout: &StackLayout,
    params: &CompositionParams<'_>,
) -> Result<PathBuf> {
    let path = layout.compose_file();
    tokio::fs::write(&path, render_composition(params)).await?;
    tracing::debug!(
        path = %path.display(),
        mirror = params.mirror,
        port = params.port,
        "Wrote composition document"
    );
    Ok(path)
}
