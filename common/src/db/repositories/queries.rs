// SQL query constants for repositories

/// SQL fragments for the file_records table
pub mod file_record_queries {
    /// Every column read into `FileRecord`
    pub const SELECT_ALL_COLUMNS: &str = r#"id, provider_id, group_id, file_name, folder,
        remote_path, storage_key, download_status, upload_status, import_status,
        created_at, updated_at"#;
}

/// Column lists for the bulk inserts, in bind order
pub mod section_queries {
    pub const SUMMARY_COLUMNS: &str = "file_id, merchant_id, merchant_name, settle_date, \
        total_count, total_amount, refund_count, refund_amount, fee_amount, net_amount, currency";

    pub const DETAIL_COLUMNS: &str = "file_id, transaction_id, merchant_order_no, \
        transaction_time, transaction_type, transaction_amount, fee_amount, tax, net_amount, \
        status, currency, remark";

    pub const TRANSACTION_COLUMNS: &str = "file_id, transaction_id, merchant_id, \
        merchant_order_no, transaction_time, transaction_amount, status, channel, \
        payer_account, currency";
}
