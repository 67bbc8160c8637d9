//! SQL schema definitions as const strings.
//!
//! Every statement is idempotent so the full list can run on each open.

/// SQL to create the accounts table.
pub const CREATE_ACCOUNTS: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL,
    display_name TEXT,
    username TEXT NOT NULL,
    password TEXT NOT NULL,
    imap_host TEXT NOT NULL,
    imap_port INTEGER NOT NULL,
    imap_use_tls INTEGER NOT NULL DEFAULT 1,
    smtp_host TEXT NOT NULL,
    smtp_port INTEGER NOT NULL,
    smtp_use_tls INTEGER NOT NULL DEFAULT 1,
    is_default INTEGER NOT NULL DEFAULT 0,
    sync_enabled INTEGER NOT NULL DEFAULT 1,
    last_sync_at TEXT,
    last_sync_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

/// SQL to create the folders table.
pub const CREATE_FOLDERS: &str = r#"
CREATE TABLE IF NOT EXISTS folders (
    id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    remote_name TEXT NOT NULL,
    folder_type TEXT NOT NULL,
    parent_id TEXT REFERENCES folders(id) ON DELETE SET NULL,
    uid_validity INTEGER NOT NULL DEFAULT 0,
    uid_next INTEGER NOT NULL DEFAULT 0,
    unread_count INTEGER NOT NULL DEFAULT 0,
    total_count INTEGER NOT NULL DEFAULT 0,
    UNIQUE(account_id, remote_name)
)
"#;

/// SQL to create the messages table.
///
/// `folder_id` is where the message is shown; `remote_folder_id` is the
/// mailbox its UID belongs to on the server. `(remote_folder_id, uid)` is
/// the idempotency key for ingest.
pub const CREATE_MESSAGES: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    folder_id TEXT NOT NULL REFERENCES folders(id) ON DELETE CASCADE,
    remote_folder_id TEXT NOT NULL REFERENCES folders(id) ON DELETE CASCADE,
    uid INTEGER NOT NULL,
    thread_id TEXT NOT NULL,
    message_id TEXT NOT NULL,
    in_reply_to TEXT,
    references_json TEXT NOT NULL DEFAULT '[]',
    from_address TEXT NOT NULL,
    from_name TEXT,
    to_json TEXT NOT NULL DEFAULT '[]',
    cc_json TEXT NOT NULL DEFAULT '[]',
    reply_to_json TEXT,
    subject TEXT,
    body_text TEXT,
    body_html TEXT,
    snippet TEXT NOT NULL DEFAULT '',
    date TEXT NOT NULL,
    is_read INTEGER NOT NULL DEFAULT 0,
    is_starred INTEGER NOT NULL DEFAULT 0,
    is_answered INTEGER NOT NULL DEFAULT 0,
    is_draft INTEGER NOT NULL DEFAULT 0,
    has_attachments INTEGER NOT NULL DEFAULT 0,
    body_fetched INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE(remote_folder_id, uid)
)
"#;

/// SQL to create message indexes.
pub const CREATE_MESSAGE_INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_messages_account ON messages(account_id);
CREATE INDEX IF NOT EXISTS idx_messages_folder ON messages(folder_id);
CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id);
CREATE INDEX IF NOT EXISTS idx_messages_message_id ON messages(account_id, message_id);
CREATE INDEX IF NOT EXISTS idx_messages_date ON messages(date DESC)
"#;

/// SQL to create the attachments table.
pub const CREATE_ATTACHMENTS: &str = r#"
CREATE TABLE IF NOT EXISTS attachments (
    id TEXT PRIMARY KEY,
    message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    filename TEXT NOT NULL,
    content_type TEXT NOT NULL,
    size_bytes INTEGER NOT NULL DEFAULT 0,
    content_id TEXT,
    is_inline INTEGER NOT NULL DEFAULT 0,
    storage_key TEXT
)
"#;

/// SQL to create the attachments index.
pub const CREATE_ATTACHMENTS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_attachments_message ON attachments(message_id)
"#;

/// SQL to create the labels table.
pub const CREATE_LABELS: &str = r#"
CREATE TABLE IF NOT EXISTS labels (
    id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    color TEXT,
    UNIQUE(account_id, name)
)
"#;

/// SQL to create the message_labels join table.
pub const CREATE_MESSAGE_LABELS: &str = r#"
CREATE TABLE IF NOT EXISTS message_labels (
    message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    label_id TEXT NOT NULL REFERENCES labels(id) ON DELETE CASCADE,
    PRIMARY KEY (message_id, label_id)
)
"#;

/// SQL to create the rules table.
///
/// Conditions and actions are stored as JSON arrays.
pub const CREATE_RULES: &str = r#"
CREATE TABLE IF NOT EXISTS rules (
    id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL REFERENCES accounts(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    priority INTEGER NOT NULL DEFAULT 0,
    match_mode TEXT NOT NULL DEFAULT 'all',
    conditions_json TEXT NOT NULL,
    actions_json TEXT NOT NULL,
    stop_processing INTEGER NOT NULL DEFAULT 0
)
"#;

/// SQL to create the rules index.
pub const CREATE_RULES_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_rules_account ON rules(account_id, priority)
"#;

/// Returns all schema creation statements in order.
pub fn all_migrations() -> Vec<&'static str> {
    vec![
        CREATE_ACCOUNTS,
        CREATE_FOLDERS,
        CREATE_MESSAGES,
        CREATE_MESSAGE_INDEXES,
        CREATE_ATTACHMENTS,
        CREATE_ATTACHMENTS_INDEX,
        CREATE_LABELS,
        CREATE_MESSAGE_LABELS,
        CREATE_RULES,
        CREATE_RULES_INDEX,
    ]
}
