use std::sync::Arc;

use super::client::{KustoClient, mapping_name};
use crate::{
    internal_events::{AzureDataExplorerTableCreationSkipped, AzureDataExplorerTableProvisioned},
    sinks::util::Deadline,
};

/// Creates destination tables and their JSON ingestion mappings.
pub struct TableProvisioner {
    client: Arc<dyn KustoClient>,
    database: String,
    create_tables: bool,
}

impl TableProvisioner {
    pub fn new(client: Arc<dyn KustoClient>, database: String, create_tables: bool) -> Self {
        Self {
            client,
            database,
            create_tables,
        }
    }

    /// Makes sure `table` and `<table>_mapping` exist.
    ///
    /// Both statements are create-or-merge style and may be repeated safely.
    /// Nothing is remembered between calls. With table creation disabled the
    /// table is assumed to exist and nothing is sent.
    pub async fn ensure_table(&self, table: &str, deadline: Deadline) -> crate::Result<()> {
        if !self.create_tables {
            emit!(AzureDataExplorerTableCreationSkipped { table });
            return Ok(());
        }

        for statement in [create_table_command(table), create_mapping_command(table)] {
            deadline
                .run(self.client.execute_mgmt(&self.database, &statement))
                .await??;
        }

        emit!(AzureDataExplorerTableProvisioned {
            table,
            mapping: &mapping_name(table),
        });
        Ok(())
    }
}

pub fn create_table_command(table: &str) -> String {
    format!(
        ".create-merge table ['{table}']  (['fields']:dynamic, ['name']:string, ['tags']:dynamic, ['timestamp']:datetime);"
    )
}

pub fn create_mapping_command(table: &str) -> String {
    format!(
        r#".create-or-alter table ['{table}'] ingestion json mapping '{mapping}' '[{{"column":"fields", "Properties":{{"Path":"$[\'fields\']"}}}},{{"column":"name", "Properties":{{"Path":"$[\'name\']"}}}},{{"column":"tags", "Properties":{{"Path":"$[\'tags\']"}}}},{{"column":"timestamp", "Properties":{{"Path":"$[\'timestamp\']"}}}}]'"#,
        mapping = mapping_name(table),
    )
}
