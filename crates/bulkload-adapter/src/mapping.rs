//! Positional column renames applied before upload.
//!
//! Nodes: column 0 becomes `nodeId`, column 1 becomes `labels` (comma-joined strings split into a
//! list). Relationships: columns 0..3 become `sourceNodeId`, `targetNodeId`, `relationshipType`.
//! Any further columns pass through as properties.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, ListBuilder, StringBuilder};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;

pub const NODE_ID: &str = "nodeId";
pub const LABELS: &str = "labels";
pub const SOURCE_NODE_ID: &str = "sourceNodeId";
pub const TARGET_NODE_ID: &str = "targetNodeId";
pub const RELATIONSHIP_TYPE: &str = "relationshipType";

pub fn map_node_batch(batch: &RecordBatch) -> Result<RecordBatch, ArrowError> {
    let mut columns: Vec<ArrayRef> = batch.columns().to_vec();
    if columns.len() < 2 {
        return Err(ArrowError::SchemaError(format!(
            "node batch needs id and label columns, got {}",
            columns.len()
        )));
    }
    columns[1] = split_labels(&columns[1])?;
    let schema = batch.schema();
    let mut fields: Vec<Field> = schema
        .fields()
        .iter()
        .map(|field| field.as_ref().clone())
        .collect();
    fields[0] = fields[0].clone().with_name(NODE_ID);
    fields[1] = Field::new(LABELS, columns[1].data_type().clone(), true);
    rebuild(schema.as_ref(), fields, columns)
}

pub fn map_edge_batch(batch: &RecordBatch) -> Result<RecordBatch, ArrowError> {
    if batch.num_columns() < 3 {
        return Err(ArrowError::SchemaError(format!(
            "relationship batch needs source, target and type columns, got {}",
            batch.num_columns()
        )));
    }
    let schema = batch.schema();
    let names = [SOURCE_NODE_ID, TARGET_NODE_ID, RELATIONSHIP_TYPE];
    let fields: Vec<Field> = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(idx, field)| match names.get(idx) {
            Some(name) => field.as_ref().clone().with_name(*name),
            None => field.as_ref().clone(),
        })
        .collect();
    rebuild(schema.as_ref(), fields, batch.columns().to_vec())
}

fn rebuild(
    original: &Schema,
    fields: Vec<Field>,
    columns: Vec<ArrayRef>,
) -> Result<RecordBatch, ArrowError> {
    let schema = Schema::new_with_metadata(fields, original.metadata().clone());
    RecordBatch::try_new(Arc::new(schema), columns)
}

/// Comma-joined label strings to `List<Utf8>`, split verbatim: no trimming, empty labels kept.
/// Lists pass through; nulls become empty lists.
pub fn split_labels(column: &ArrayRef) -> Result<ArrayRef, ArrowError> {
    if matches!(column.data_type(), DataType::List(_) | DataType::LargeList(_)) {
        return Ok(column.clone());
    }
    let strings = cast(column.as_ref(), &DataType::Utf8)?;
    let strings = strings.as_string::<i32>();

    let mut builder = ListBuilder::new(StringBuilder::new());
    for value in strings.iter() {
        if let Some(value) = value {
            for label in value.split(',') {
                builder.values().append_value(label);
            }
        }
        builder.append(true);
    }
    Ok(Arc::new(builder.finish()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, ListArray, StringArray};

    fn labels_of(list: &ListArray, row: usize) -> Vec<String> {
        let values = list.value(row);
        values
            .as_string::<i32>()
            .iter()
            .map(|v| v.unwrap_or_default().to_string())
            .collect()
    }

    #[test]
    fn node_batch_renames_and_splits_labels() {
        let batch = RecordBatch::try_from_iter(vec![
            ("id", Arc::new(StringArray::from(vec!["n1", "n2", "n3"])) as ArrayRef),
            (
                "label_str",
                Arc::new(StringArray::from(vec![Some("A,B"), Some("C"), None])) as ArrayRef,
            ),
            ("age", Arc::new(Int64Array::from(vec![1, 2, 3])) as ArrayRef),
        ])
        .unwrap();

        let mapped = map_node_batch(&batch).unwrap();
        let schema = mapped.schema();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(names, vec!["nodeId", "labels", "age"]);

        let labels = mapped.column(1).as_list::<i32>();
        assert_eq!(labels_of(labels, 0), vec!["A", "B"]);
        assert_eq!(labels_of(labels, 1), vec!["C"]);
        assert!(labels_of(labels, 2).is_empty());
        match schema.field(1).data_type() {
            DataType::List(item) => assert_eq!(item.data_type(), &DataType::Utf8),
            other => panic!("unexpected label type {other:?}"),
        }
    }

    #[test]
    fn labels_split_verbatim_on_commas() {
        let column: ArrayRef = Arc::new(StringArray::from(vec![
            Some(""),
            Some(" A"),
            Some("A, B"),
            Some("A,,B"),
            None,
        ]));
        let split = split_labels(&column).unwrap();
        let labels = split.as_list::<i32>();
        assert_eq!(labels_of(labels, 0), vec![""]);
        assert_eq!(labels_of(labels, 1), vec![" A"]);
        assert_eq!(labels_of(labels, 2), vec!["A", " B"]);
        assert_eq!(labels_of(labels, 3), vec!["A", "", "B"]);
        assert!(labels_of(labels, 4).is_empty());
        assert!(labels.is_valid(4));
    }

    #[test]
    fn edge_batch_renames_first_three_columns() {
        let batch = RecordBatch::try_from_iter(vec![
            ("src", Arc::new(StringArray::from(vec!["n1"])) as ArrayRef),
            ("dst", Arc::new(StringArray::from(vec!["n2"])) as ArrayRef),
            ("type", Arc::new(StringArray::from(vec!["KNOWS"])) as ArrayRef),
            ("since", Arc::new(Int64Array::from(vec![2020])) as ArrayRef),
        ])
        .unwrap();

        let mapped = map_edge_batch(&batch).unwrap();
        let schema = mapped.schema();
        let names: Vec<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
        assert_eq!(
            names,
            vec!["sourceNodeId", "targetNodeId", "relationshipType", "since"]
        );
        assert_eq!(mapped.num_rows(), 1);
    }

    #[test]
    fn rejects_narrow_batches() {
        let batch = RecordBatch::try_from_iter(vec![(
            "id",
            Arc::new(StringArray::from(vec!["n1"])) as ArrayRef,
        )])
        .unwrap();
        assert!(map_node_batch(&batch).is_err());
        assert!(map_edge_batch(&batch).is_err());
    }
}
