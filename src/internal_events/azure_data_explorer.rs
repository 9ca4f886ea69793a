use metrics::counter;

use super::{
    InternalEvent,
    prelude::{error_stage, error_type},
};
use crate::{
    codecs::SerializeError,
    sinks::{
        azure_data_explorer::{IngestionStatus, IngestionType},
        util::DeadlineError,
    },
};

#[derive(Debug)]
pub struct AzureDataExplorerTableCreationSkipped<'a> {
    pub table: &'a str,
}

impl InternalEvent for AzureDataExplorerTableCreationSkipped<'_> {
    fn emit(self) {
        info!(message = "Skipped table creation.", table = %self.table);
    }
}

#[derive(Debug)]
pub struct AzureDataExplorerTableProvisioned<'a> {
    pub table: &'a str,
    pub mapping: &'a str,
}

impl InternalEvent for AzureDataExplorerTableProvisioned<'_> {
    fn emit(self) {
        debug!(
            message = "Table and ingestion mapping created.",
            table = %self.table,
            mapping = %self.mapping,
        );
    }
}

#[derive(Debug)]
pub struct AzureDataExplorerProvisioningError<'a> {
    pub table: &'a str,
    pub error: &'a crate::Error,
}

impl InternalEvent for AzureDataExplorerProvisioningError<'_> {
    fn emit(self) {
        error!(
            message = "Creating table failed.",
            table = %self.table,
            error = %self.error,
            error_type = error_type::CONFIGURATION_FAILED,
            stage = error_stage::PROCESSING,
        );
        counter!(
            "component_errors_total",
            "error_type" => error_type::CONFIGURATION_FAILED,
            "stage" => error_stage::PROCESSING,
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct AzureDataExplorerIngestorCreated<'a> {
    pub table: &'a str,
    pub ingestion_type: IngestionType,
}

impl InternalEvent for AzureDataExplorerIngestorCreated<'_> {
    fn emit(self) {
        debug!(
            message = "Ingestor created.",
            table = %self.table,
            ingestion_type = %self.ingestion_type,
        );
    }
}

#[derive(Debug)]
pub struct AzureDataExplorerIngestionSent<'a> {
    pub table: &'a str,
    pub count: usize,
    pub byte_size: usize,
    pub status: IngestionStatus,
}

impl InternalEvent for AzureDataExplorerIngestionSent<'_> {
    fn emit(self) {
        debug!(
            message = "Ingestion request sent.",
            table = %self.table,
            count = self.count,
            byte_size = self.byte_size,
            status = ?self.status,
        );
        counter!("component_sent_events_total", "table" => self.table.to_owned())
            .increment(self.count as u64);
        counter!("component_sent_bytes_total", "table" => self.table.to_owned())
            .increment(self.byte_size as u64);
    }
}

#[derive(Debug)]
pub struct AzureDataExplorerIngestionError<'a> {
    pub table: &'a str,
    pub error: &'a crate::Error,
    pub count: usize,
}

impl InternalEvent for AzureDataExplorerIngestionError<'_> {
    fn emit(self) {
        let reason = "Sending ingestion request to Azure Data Explorer failed.";
        let error_type = if self.error.is::<DeadlineError>() {
            error_type::TIMED_OUT
        } else {
            error_type::REQUEST_FAILED
        };
        error!(
            message = reason,
            table = %self.table,
            error = %self.error,
            error_type = error_type,
            stage = error_stage::SENDING,
        );
        counter!(
            "component_errors_total",
            "error_type" => error_type,
            "stage" => error_stage::SENDING,
        )
        .increment(1);
        counter!("component_discarded_events_total", "intentional" => "false")
            .increment(self.count as u64);
    }
}

#[derive(Debug)]
pub struct AzureDataExplorerEncodingError<'a> {
    pub error: &'a SerializeError,
    pub count: usize,
}

impl InternalEvent for AzureDataExplorerEncodingError<'_> {
    fn emit(self) {
        let reason = "Failed to serialize metrics, dropping batch.";
        error!(
            message = reason,
            error = %self.error,
            error_type = error_type::ENCODER_FAILED,
            stage = error_stage::PROCESSING,
        );
        counter!(
            "component_errors_total",
            "error_type" => error_type::ENCODER_FAILED,
            "stage" => error_stage::PROCESSING,
        )
        .increment(1);
        counter!("component_discarded_events_total", "intentional" => "false")
            .increment(self.count as u64);
    }
}

#[derive(Debug)]
pub struct AzureDataExplorerCloseError<'a> {
    pub resource: &'a str,
    pub error: &'a crate::Error,
}

impl InternalEvent for AzureDataExplorerCloseError<'_> {
    fn emit(self) {
        error!(
            message = "Failed to close resource.",
            resource = %self.resource,
            error = %self.error,
            error_type = error_type::WRITER_FAILED,
            stage = error_stage::SENDING,
        );
        counter!(
            "component_errors_total",
            "error_type" => error_type::WRITER_FAILED,
            "stage" => error_stage::SENDING,
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct AzureDataExplorerClosed;

impl InternalEvent for AzureDataExplorerClosed {
    fn emit(self) {
        info!(message = "Closed ingestors and client.");
    }
}
