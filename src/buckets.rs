use scylla::frame::value::CqlTimestamp;
use uuid::Uuid;

use crate::cluster::ScyllaStore;
use crate::error::StoreError;
use crate::meta_store::{self, Bucket};

impl ScyllaStore {
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn get_bucket(&self, name: &str) -> Result<Option<Bucket>, StoreError> {
        let row = self
            .session
            .execute_unpaged(&self.st.select_bucket, (name,))
            .await?
            .into_rows_result()
            .map_err(StoreError::decode)?
            .maybe_first_row::<(Uuid, CqlTimestamp)>()
            .map_err(StoreError::decode)?;

        Ok(row.map(|(bucket_id, creation_date)| Bucket {
            name: name.to_owned(),
            bucket_id,
            creation_date: meta_store::from_cql(creation_date),
        }))
    }

    /// Check-then-insert; a lost race leaves the later writer's row, which is
    /// within the engine's last-writer-wins model.
    #[tracing::instrument(level = "info", skip(self))]
    pub async fn create_bucket(&self, name: &str) -> Result<Bucket, StoreError> {
        if self.get_bucket(name).await?.is_some() {
            return Err(StoreError::BucketAlreadyExists);
        }
        tracing::info!("creating bucket [{name}]");

        self.session
            .execute_unpaged(
                &self.st.insert_bucket,
                (name, Uuid::new_v4(), meta_store::to_cql(meta_store::now())),
            )
            .await?;

        self.get_bucket(name)
            .await?
            .ok_or_else(|| StoreError::decode("bucket row missing after insert"))
    }

    #[tracing::instrument(level = "info", skip(self))]
    pub async fn list_all_buckets(&self) -> Result<Vec<Bucket>, StoreError> {
        let result = self
            .session
            .execute_unpaged(&self.st.list_buckets, ())
            .await?
            .into_rows_result()
            .map_err(StoreError::decode)?;

        let mut buckets = Vec::new();
        for row in result
            .rows::<(String, Uuid, CqlTimestamp)>()
            .map_err(StoreError::decode)?
        {
            let (name, bucket_id, creation_date) = row.map_err(StoreError::decode)?;
            buckets.push(Bucket {
                name,
                bucket_id,
                creation_date: meta_store::from_cql(creation_date),
            });
        }

        Ok(buckets)
    }
}
