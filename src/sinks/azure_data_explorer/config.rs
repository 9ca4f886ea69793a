use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use url::Url;

use super::{
    auth::AzureAuthConfig, client::KustoClient, http::HttpKustoClient, router::MetricsGrouping,
    sink::AzureDataExplorerSink,
};
use crate::sinks::{Healthcheck, util::Deadline};

/// Statement used to check that the cluster answers management requests.
pub const HEALTHCHECK_STATEMENT: &str = ".show version";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(super)))]
pub enum BuildError {
    #[snafu(display("Endpoint configuration cannot be empty"))]
    EmptyEndpoint,
    #[snafu(display("Invalid endpoint URL {:?}: {}", endpoint, source))]
    InvalidEndpoint {
        endpoint: String,
        source: url::ParseError,
    },
    #[snafu(display("Database configuration cannot be empty"))]
    EmptyDatabase,
    #[snafu(display("Table name cannot be empty for SingleTable metrics grouping type"))]
    EmptyTableName,
    #[snafu(display("Metrics grouping type is not valid: {:?}", value))]
    InvalidMetricsGrouping { value: String },
    #[snafu(display("Unknown ingestion type {:?}", value))]
    UnknownIngestionType { value: String },
    #[snafu(display(
        "Missing Azure credential `{}`: set it under `auth` or in the {} environment variable",
        field,
        env_var
    ))]
    MissingCredential {
        field: &'static str,
        env_var: &'static str,
    },
}

/// How metrics are spread over destination tables.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum MetricsGroupingType {
    /// One table per distinct metric name.
    #[default]
    TablePerMetric,
    /// Every metric goes to `table_name`.
    SingleTable,
}

impl MetricsGroupingType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TablePerMetric => "tablepermetric",
            Self::SingleTable => "singletable",
        }
    }
}

impl FromStr for MetricsGroupingType {
    type Err = BuildError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "" | "tablepermetric" => Ok(Self::TablePerMetric),
            "singletable" => Ok(Self::SingleTable),
            _ => InvalidMetricsGroupingSnafu { value }.fail(),
        }
    }
}

impl TryFrom<String> for MetricsGroupingType {
    type Error = BuildError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MetricsGroupingType> for String {
    fn from(grouping: MetricsGroupingType) -> Self {
        grouping.as_str().to_owned()
    }
}

impl fmt::Display for MetricsGroupingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ingestion strategy used by every per-table ingestor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum IngestionType {
    /// Payloads are staged in blob storage through a bounded local buffer and
    /// loaded by the cluster's ingestion queue.
    #[default]
    Queued,
    /// Payloads are streamed directly; the store decides how to buffer them.
    Managed,
}

impl IngestionType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Managed => "managed",
        }
    }
}

impl FromStr for IngestionType {
    type Err = BuildError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "" | "queued" => Ok(Self::Queued),
            "managed" => Ok(Self::Managed),
            _ => UnknownIngestionTypeSnafu { value }.fail(),
        }
    }
}

impl TryFrom<String> for IngestionType {
    type Error = BuildError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IngestionType> for String {
    fn from(ingestion_type: IngestionType) -> Self {
        ingestion_type.as_str().to_owned()
    }
}

impl fmt::Display for IngestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const fn default_create_tables() -> bool {
    true
}

const fn default_timeout_secs() -> u64 {
    20
}

/// Configuration for the `azure_data_explorer` sink.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AzureDataExplorerConfig {
    /// The cluster URI, for example `https://mycluster.westeurope.kusto.windows.net`.
    #[serde(default)]
    pub endpoint_url: String,

    /// The database that receives the metrics.
    #[serde(default)]
    pub database: String,

    /// `tablepermetric` or `singletable`.
    #[serde(default)]
    pub metrics_grouping_type: MetricsGroupingType,

    /// Destination table when `metrics_grouping_type` is `singletable`.
    #[serde(default)]
    pub table_name: String,

    /// Whether tables and ingestion mappings are created on first use.
    #[serde(default = "default_create_tables")]
    pub create_tables: bool,

    /// `queued` or `managed`.
    #[serde(default)]
    pub ingestion_type: IngestionType,

    /// Upper bound, in seconds, for everything one write does.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub auth: AzureAuthConfig,
}

impl AzureDataExplorerConfig {
    pub fn generate_config() -> toml::Value {
        toml::from_str(indoc::indoc! {r#"
            endpoint_url = "https://mycluster.westeurope.kusto.windows.net"
            database = "telemetry"
            metrics_grouping_type = "tablepermetric"
            create_tables = true
            ingestion_type = "queued"
            timeout_secs = 20
        "#})
        .unwrap()
    }

    /// Checks the settings that can be checked without touching the network.
    pub fn validate(&self) -> Result<AzureDataExplorerSettings, BuildError> {
        if self.endpoint_url.is_empty() {
            return EmptyEndpointSnafu.fail();
        }
        if self.database.is_empty() {
            return EmptyDatabaseSnafu.fail();
        }
        let grouping = match self.metrics_grouping_type {
            MetricsGroupingType::TablePerMetric => MetricsGrouping::TablePerMetric,
            MetricsGroupingType::SingleTable if self.table_name.is_empty() => {
                return EmptyTableNameSnafu.fail();
            }
            MetricsGroupingType::SingleTable => MetricsGrouping::SingleTable {
                table: self.table_name.clone(),
            },
        };
        let endpoint = Url::parse(&self.endpoint_url).context(InvalidEndpointSnafu {
            endpoint: self.endpoint_url.clone(),
        })?;

        Ok(AzureDataExplorerSettings {
            endpoint,
            database: self.database.clone(),
            grouping,
            create_tables: self.create_tables,
            ingestion_type: self.ingestion_type,
            timeout: Duration::from_secs(self.timeout_secs),
        })
    }

    pub fn build(&self) -> crate::Result<(AzureDataExplorerSink, Healthcheck)> {
        let settings = self.validate()?;
        let credentials = self.auth.resolve()?;
        let client: Arc<dyn KustoClient> =
            Arc::new(HttpKustoClient::new(settings.endpoint.clone(), credentials)?);

        let healthcheck = healthcheck(
            Arc::clone(&client),
            settings.database.clone(),
            settings.timeout,
        )
        .boxed();
        let sink = AzureDataExplorerSink::new(settings, client);

        Ok((sink, healthcheck))
    }
}

/// Validated configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AzureDataExplorerSettings {
    pub endpoint: Url,
    pub database: String,
    pub grouping: MetricsGrouping,
    pub create_tables: bool,
    pub ingestion_type: IngestionType,
    pub timeout: Duration,
}

pub(super) async fn healthcheck(
    client: Arc<dyn KustoClient>,
    database: String,
    timeout: Duration,
) -> crate::Result<()> {
    Deadline::after(timeout)
        .run(client.execute_mgmt(&database, HEALTHCHECK_STATEMENT))
        .await??;
    Ok(())
}
