//! LanceDB 패시지 인덱스
//!
//! (토픽, 순번)을 키로 하는 ANN 벡터 인덱스입니다. Apache Arrow 기반의
//! columnar 저장소라 프로세스 재시작 후에도 인덱스가 유지됩니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::Path;
use std::sync::Arc;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};

use crate::error::{KnowledgeError, Result};

use super::vector::{PassageId, PassageIndex, PassageRecord, RetrievedPassage};

/// 패시지 테이블 이름
const TABLE_NAME: &str = "passages";

// ============================================================================
// LancePassageIndex
// ============================================================================

/// LanceDB 벡터 인덱스 구현
///
/// 임베딩 차원은 컴파일 타임 상수가 아니라 임베더가 결정합니다.
pub struct LancePassageIndex {
    db: Connection,
    dimension: i32,
}

impl LancePassageIndex {
    /// LanceDB 인덱스 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    /// * `dimension` - 임베딩 벡터 차원
    pub async fn open(path: &Path, dimension: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| KnowledgeError::store("create index directory", e))?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| KnowledgeError::Store("invalid path encoding".to_string()))?;

        let db = lancedb::connect(path_str).execute().await?;

        Ok(Self {
            db,
            dimension: dimension as i32,
        })
    }

    /// 패시지 테이블 스키마
    fn schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("topic", DataType::Utf8, false),
            Field::new("passage_index", DataType::Int32, false),
            Field::new("text", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension,
                ),
                false,
            ),
        ])
    }

    /// 레코드들을 Arrow RecordBatch로 변환
    fn records_to_batch(&self, records: &[PassageRecord]) -> Result<RecordBatch> {
        let topics: Vec<&str> = records.iter().map(|r| r.id.topic.as_str()).collect();
        let indices: Vec<i32> = records.iter().map(|r| r.id.index as i32).collect();
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();

        let embeddings_flat: Vec<f32> = records
            .iter()
            .flat_map(|r| r.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.dimension,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )?;

        let batch = RecordBatch::try_new(
            Arc::new(self.schema()),
            vec![
                Arc::new(StringArray::from(topics)),
                Arc::new(Int32Array::from(indices)),
                Arc::new(StringArray::from(texts)),
                Arc::new(embeddings_list),
            ],
        )?;

        Ok(batch)
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.contains(&TABLE_NAME.to_string()))
            .unwrap_or(false)
    }

    async fn open_table(&self) -> Result<lancedb::table::Table> {
        Ok(self.db.open_table(TABLE_NAME).execute().await?)
    }
}

/// SQL 문자열 리터럴 이스케이프 (작은따옴표 중복)
fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

#[async_trait]
impl PassageIndex for LancePassageIndex {
    async fn insert_batch(&self, records: &[PassageRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let batch = self.records_to_batch(records)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        if self.table_exists().await {
            let table = self.open_table().await?;
            table.add(batches).execute().await?;
        } else {
            self.db.create_table(TABLE_NAME, batches).execute().await?;
        }

        Ok(records.len())
    }

    async fn delete_topic(&self, topic: &str) -> Result<usize> {
        if !self.table_exists().await {
            return Ok(0);
        }

        let removed = self.topic_count(topic).await?;
        if removed == 0 {
            return Ok(0);
        }

        let table = self.open_table().await?;
        let filter = format!("topic = '{}'", escape_literal(topic));
        table.delete(&filter).await?;

        tracing::debug!("Deleted {} passages for topic '{}'", removed, topic);
        Ok(removed)
    }

    async fn search(&self, query_embedding: &[f32], limit: usize) -> Result<Vec<RetrievedPassage>> {
        if !self.table_exists().await {
            return Ok(vec![]);
        }

        let table = self.open_table().await?;

        let results = table
            .vector_search(query_embedding.to_vec())?
            .limit(limit)
            .execute()
            .await?;

        let batches: Vec<RecordBatch> = results.try_collect().await?;
        let mut passages = Vec::new();

        for batch in batches {
            let topics = batch
                .column_by_name("topic")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| KnowledgeError::Store("missing topic column".to_string()))?;

            let indices = batch
                .column_by_name("passage_index")
                .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
                .ok_or_else(|| KnowledgeError::Store("missing passage_index column".to_string()))?;

            let texts = batch
                .column_by_name("text")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| KnowledgeError::Store("missing text column".to_string()))?;

            // _distance 컬럼은 LanceDB가 자동 추가
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| KnowledgeError::Store("missing _distance column".to_string()))?;

            for i in 0..batch.num_rows() {
                // L2 거리 → 유사도 근사
                let similarity = 1.0 / (1.0 + distances.value(i));

                passages.push(RetrievedPassage {
                    id: PassageId::new(topics.value(i), indices.value(i) as u32),
                    text: texts.value(i).to_string(),
                    similarity,
                });
            }
        }

        Ok(passages)
    }

    async fn count(&self) -> Result<usize> {
        if !self.table_exists().await {
            return Ok(0);
        }

        let table = self.open_table().await?;
        Ok(table.count_rows(None).await?)
    }

    async fn topic_count(&self, topic: &str) -> Result<usize> {
        if !self.table_exists().await {
            return Ok(0);
        }

        let table = self.open_table().await?;
        let filter = format!("topic = '{}'", escape_literal(topic));
        Ok(table.count_rows(Some(filter)).await?)
    }
}

// ============================================================================
// Tests
// ============================================================================
