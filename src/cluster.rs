use std::fmt::Debug;

use scylla::prepared_statement::PreparedStatement;
use scylla::{Session, SessionBuilder};
use tracing::info;

use crate::error::StoreError;

/// Engine configuration, fixed at startup. The geometry values apply to newly
/// written versions only; existing versions pin their own on the version row.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub hosts: Vec<String>,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub chunk_size: i32,
    pub chunks_per_partition: i32,
    pub compaction_strategy: bool,
}

const KEYSPACE: &str = "s3";

/// The storage engine: one shared cluster session plus the statements
/// prepared against it. Cheap to share across request tasks.
pub struct ScyllaStore {
    pub(crate) session: Session,
    pub(crate) st: Statements,
    pub(crate) cfg: StoreConfig,
}

impl Debug for ScyllaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScyllaStore").finish()
    }
}

impl ScyllaStore {
    pub async fn connect(cfg: StoreConfig) -> Result<Self, StoreError> {
        let mut builder = SessionBuilder::new();
        for host in &cfg.hosts {
            builder = builder.known_node(format!("{}:{}", host, cfg.port));
        }
        if !cfg.username.is_empty() || !cfg.password.is_empty() {
            builder = builder.user(cfg.username.clone(), cfg.password.clone());
        }
        let session = builder.build().await?;

        ensure_keyspace(&session).await?;
        ensure_tables(&session, cfg.compaction_strategy).await?;
        let st = Statements::prepare(&session).await?;
        info!("connected to the cluster, schema is up");

        Ok(Self { session, st, cfg })
    }
}

async fn ensure_keyspace(session: &Session) -> Result<(), StoreError> {
    session
        .query_unpaged(
            "CREATE KEYSPACE IF NOT EXISTS s3 WITH replication = { \
                'class': 'NetworkTopologyStrategy', \
                'replication_factor': '3' \
            } AND durable_writes = TRUE",
            (),
        )
        .await?;
    session.use_keyspace(KEYSPACE, false).await?;
    Ok(())
}

async fn ensure_tables(session: &Session, compaction_strategy: bool) -> Result<(), StoreError> {
    for cql in [
        "CREATE TABLE IF NOT EXISTS bucket ( \
            name TEXT, \
            bucket_id UUID, \
            creation_date TIMESTAMP, \
            metadata TEXT, \
            PRIMARY KEY (name) \
        )",
        "CREATE TABLE IF NOT EXISTS object ( \
            bucket_id UUID, \
            key TEXT, \
            object_id UUID, \
            version INT, \
            metadata TEXT, \
            PRIMARY KEY (bucket_id, key) \
        )",
        "CREATE TABLE IF NOT EXISTS version ( \
            object_id UUID, \
            bucket_id UUID, \
            version INT, \
            chunk_size INT, \
            chunks_per_partition INT, \
            content_type TEXT, \
            creation_date TIMESTAMP, \
            digest TEXT, \
            size BIGINT, \
            parts BOOLEAN, \
            metadata TEXT, \
            PRIMARY KEY (object_id, version) \
        ) WITH CLUSTERING ORDER BY (version DESC)",
        "CREATE TABLE IF NOT EXISTS part ( \
            object_id UUID, \
            version INT, \
            part INT, \
            blob_id UUID, \
            digest TEXT, \
            size BIGINT, \
            PRIMARY KEY ((object_id, version), part) \
        ) WITH CLUSTERING ORDER BY (part ASC)",
        "CREATE TABLE IF NOT EXISTS multipart_upload ( \
            key TEXT, \
            upload_id UUID, \
            object_id UUID, \
            version INT, \
            bucket_id UUID, \
            metadata TEXT, \
            PRIMARY KEY (key, upload_id) \
        )",
    ] {
        session.query_unpaged(cql, ()).await?;
    }

    let mut chunk = String::from(
        "CREATE TABLE IF NOT EXISTS chunk ( \
            blob_id UUID, \
            partition INT, \
            ix INT, \
            data BLOB, \
            PRIMARY KEY ((blob_id, partition), ix) \
        ) WITH CLUSTERING ORDER BY (ix ASC)",
    );
    if compaction_strategy {
        chunk.push_str(
            " AND compaction = { \
                'class': 'ObjectAwareCompactionStrategy', \
                'object-identifier': 'blob_id' \
            }",
        );
    }
    session.query_unpaged(chunk, ()).await?;

    Ok(())
}

pub(crate) struct Statements {
    pub(crate) insert_bucket: PreparedStatement,
    pub(crate) select_bucket: PreparedStatement,
    pub(crate) list_buckets: PreparedStatement,

    pub(crate) insert_object: PreparedStatement,
    pub(crate) select_object: PreparedStatement,
    pub(crate) update_object: PreparedStatement,
    pub(crate) delete_object: PreparedStatement,

    pub(crate) insert_version: PreparedStatement,
    pub(crate) select_version: PreparedStatement,
    pub(crate) update_version: PreparedStatement,

    pub(crate) insert_part: PreparedStatement,
    pub(crate) update_part: PreparedStatement,
    pub(crate) select_parts: PreparedStatement,

    pub(crate) insert_chunk: PreparedStatement,
    pub(crate) select_chunk: PreparedStatement,

    pub(crate) list_keys: PreparedStatement,
    pub(crate) list_keys_prefix: PreparedStatement,
    pub(crate) list_keys_resume: PreparedStatement,

    pub(crate) insert_upload: PreparedStatement,
    pub(crate) select_upload: PreparedStatement,
    pub(crate) delete_upload: PreparedStatement,
}

impl Statements {
    async fn prepare(session: &Session) -> Result<Self, StoreError> {
        Ok(Self {
            insert_bucket: session
                .prepare("INSERT INTO bucket (name, bucket_id, creation_date, metadata) VALUES (?, ?, ?, NULL)")
                .await?,
            select_bucket: session
                .prepare("SELECT bucket_id, creation_date FROM bucket WHERE name = ?")
                .await?,
            list_buckets: session
                .prepare("SELECT name, bucket_id, creation_date FROM bucket")
                .await?,

            insert_object: session
                .prepare("INSERT INTO object (bucket_id, key, object_id, version, metadata) VALUES (?, ?, ?, ?, '')")
                .await?,
            select_object: session
                .prepare("SELECT object_id, version, metadata FROM object WHERE bucket_id = ? AND key = ?")
                .await?,
            update_object: session
                .prepare("UPDATE object SET object_id = ?, version = ?, metadata = ? WHERE bucket_id = ? AND key = ?")
                .await?,
            delete_object: session
                .prepare("DELETE FROM object WHERE bucket_id = ? AND key = ?")
                .await?,

            insert_version: session
                .prepare(
                    "INSERT INTO version (object_id, bucket_id, version, \
                     chunk_size, chunks_per_partition, content_type, creation_date, digest, size, parts, metadata) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, '', ?, false, '')",
                )
                .await?,
            select_version: session
                .prepare(
                    "SELECT bucket_id, chunk_size, chunks_per_partition, content_type, \
                     creation_date, digest, size, parts, metadata \
                     FROM version WHERE object_id = ? AND version = ?",
                )
                .await?,
            update_version: session
                .prepare("UPDATE version SET digest = ?, size = ?, parts = ?, metadata = ? WHERE object_id = ? AND version = ?")
                .await?,

            insert_part: session
                .prepare("INSERT INTO part (object_id, version, part, blob_id, digest, size) VALUES (?, ?, ?, ?, '', ?)")
                .await?,
            update_part: session
                .prepare("UPDATE part SET digest = ? WHERE object_id = ? AND version = ? AND part = ?")
                .await?,
            select_parts: session
                .prepare("SELECT part, blob_id, digest, size FROM part WHERE object_id = ? AND version = ?")
                .await?,

            insert_chunk: session
                .prepare("INSERT INTO chunk (blob_id, partition, ix, data) VALUES (?, ?, ?, ?)")
                .await?,
            select_chunk: session
                .prepare("SELECT data FROM chunk WHERE blob_id = ? AND partition = ? AND ix = ?")
                .await?,

            list_keys: session
                .prepare("SELECT key, object_id, version, metadata FROM object WHERE bucket_id = ? AND key > ? LIMIT ?")
                .await?,
            list_keys_prefix: session
                .prepare(
                    "SELECT key, object_id, version, metadata FROM object \
                     WHERE bucket_id = ? AND key >= ? AND key < ? LIMIT ?",
                )
                .await?,
            list_keys_resume: session
                .prepare(
                    "SELECT key, object_id, version, metadata FROM object \
                     WHERE bucket_id = ? AND key > ? AND key < ? LIMIT ?",
                )
                .await?,

            insert_upload: session
                .prepare(
                    "INSERT INTO multipart_upload (key, upload_id, object_id, version, bucket_id, metadata) \
                     VALUES (?, ?, ?, ?, ?, ?)",
                )
                .await?,
            select_upload: session
                .prepare("SELECT object_id, version, bucket_id, metadata FROM multipart_upload WHERE key = ? AND upload_id = ?")
                .await?,
            delete_upload: session
                .prepare("DELETE FROM multipart_upload WHERE key = ? AND upload_id = ?")
                .await?,
        })
    }
}
