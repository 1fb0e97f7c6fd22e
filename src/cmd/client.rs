//! Operator client for a running netbootd
//!
//! Every command prints `{"status": <http status>, "result": <body>}`, where
//! the body is parsed JSON when possible and trimmed text otherwise.

use base64::Engine;
use clap::Args;
use color_eyre::eyre::{eyre, Result, WrapErr};
use netbootd_common::models::{AddHostRequest, HostRequest};
use netbootd_common::{is_package_filename, Error, HostIdentifier, OsKind};
use reqwest::{multipart, Certificate, Client, Identity, Response};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_URL: &str = "http://127.0.0.1:2014/api";

/// Connection options shared by all client commands
#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Base URL of the netbootd API
    #[arg(short, long, global = true, env = "NBCTL_URL", default_value = DEFAULT_URL)]
    pub url: String,

    /// CA bundle (PEM) used to verify the server
    #[arg(short = 'C', long, global = true, env = "NBCTL_CA")]
    pub ca: Option<PathBuf>,

    /// Client certificate (PEM)
    #[arg(short, long, global = true, env = "NBCTL_CERT", requires = "key")]
    pub cert: Option<PathBuf>,

    /// Client certificate key (PEM)
    #[arg(short, long, global = true, env = "NBCTL_KEY", requires = "cert")]
    pub key: Option<PathBuf>,
}

/// Optional parts of an add command
#[derive(Debug, Default, Clone)]
pub struct AddOptions<'a> {
    pub package_file: Option<&'a Path>,
    pub serial: Option<&'a str>,
    pub disklabel_file: Option<&'a Path>,
}

pub struct NetbootClient {
    http: Client,
    url: String,
}

impl NetbootClient {
    pub fn new(args: &ClientArgs) -> Result<Self> {
        let mut builder = Client::builder();

        if let Some(ca) = &args.ca {
            let pem = std::fs::read(ca).wrap_err_with(|| format!("Failed to read {}", ca.display()))?;
            for cert in Certificate::from_pem_bundle(&pem).wrap_err("Invalid CA bundle")? {
                builder = builder.add_root_certificate(cert);
            }
        }

        if let (Some(cert), Some(key)) = (&args.cert, &args.key) {
            let mut pem =
                std::fs::read(cert).wrap_err_with(|| format!("Failed to read {}", cert.display()))?;
            pem.extend(std::fs::read(key).wrap_err_with(|| format!("Failed to read {}", key.display()))?);
            builder = builder.identity(Identity::from_pem(&pem).wrap_err("Invalid client certificate")?);
        }

        Ok(Self {
            http: builder.build().wrap_err("Failed to build HTTP client")?,
            url: args.url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.url, path)
    }

    /// Upload `<mac>.tgz` as the `uploadFile` form field
    pub async fn upload_package(&self, package_file: &Path) -> Result<Value> {
        let filename = package_file
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();
        if !is_package_filename(&filename) {
            return Err(Error::IllegalFilename(filename).into());
        }

        let data = tokio::fs::read(package_file)
            .await
            .wrap_err_with(|| format!("Failed to read {}", package_file.display()))?;
        info!(file = %filename, bytes = data.len(), "Uploading package");

        let part = multipart::Part::bytes(data)
            .file_name(filename)
            .mime_str("application/gzip")?;
        let form = multipart::Form::new().part("uploadFile", part);

        let response = self
            .http
            .post(self.endpoint("tarball/"))
            .multipart(form)
            .send()
            .await?;
        parse_response(response).await
    }

    /// Register a host, uploading its package first when one is given
    pub async fn add(
        &self,
        mac: &str,
        os: &str,
        response_file: &Path,
        options: AddOptions<'_>,
    ) -> Result<Value> {
        let id = HostIdentifier::parse(mac)?;
        let os: OsKind = os.parse()?;

        let answers = tokio::fs::read(response_file)
            .await
            .wrap_err_with(|| format!("Failed to read {}", response_file.display()))?;
        let disklabel_template = match options.disklabel_file {
            Some(path) => tokio::fs::read_to_string(path)
                .await
                .wrap_err_with(|| format!("Failed to read {}", path.display()))?
                .trim_end()
                .to_string(),
            None => String::new(),
        };

        let package_upload = match options.package_file {
            Some(path) => self.upload_package(path).await?,
            None => Value::Null,
        };

        let request = AddHostRequest {
            address: id.to_string(),
            os: os.to_string(),
            version: String::new(),
            serial: options.serial.unwrap_or_default().to_string(),
            config: base64::engine::general_purpose::STANDARD.encode(answers),
            disklabel_template,
        };
        let response = self
            .http
            .put(self.endpoint("host/"))
            .json(&request)
            .send()
            .await?;

        let mut result = parse_response(response).await?;
        result["package_upload"] = package_upload;
        Ok(result)
    }

    pub async fn list(&self) -> Result<Value> {
        let response = self.http.get(self.endpoint("hosts/")).send().await?;
        parse_response(response).await
    }

    pub async fn delete(&self, mac: &str) -> Result<Value> {
        let id = HostIdentifier::parse(mac)?;
        let request = HostRequest {
            address: id.to_string(),
        };
        let response = self
            .http
            .delete(self.endpoint("host/"))
            .json(&request)
            .send()
            .await?;
        parse_response(response).await
    }

    /// Delete every registered host, one request each
    pub async fn delete_all(&self) -> Result<Value> {
        let listing = self.list().await?;
        let addresses = listing["result"]["addresses"]
            .as_array()
            .ok_or_else(|| eyre!("Unexpected host listing: {}", listing))?;

        let mut results = Vec::with_capacity(addresses.len());
        for mac in addresses.iter().filter_map(Value::as_str) {
            debug!(mac, "Deleting host");
            results.push(self.delete(mac).await?);
        }
        Ok(Value::Array(results))
    }

    pub async fn address(&self, mac: &str) -> Result<Value> {
        let id = HostIdentifier::parse(mac)?;
        let response = self
            .http
            .get(self.endpoint(&format!("address/{}", id)))
            .send()
            .await?;
        parse_response(response).await
    }
}

async fn parse_response(response: Response) -> Result<Value> {
    let status = response.status().as_u16();
    let text = response.text().await?;
    Ok(wrap_result(status, &text))
}

fn wrap_result(status: u16, body: &str) -> Value {
    let result = serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.trim().to_string()));
    json!({ "status": status, "result": result })
}
