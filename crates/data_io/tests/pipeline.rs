//! End-to-end pipelines built from registry names.
//!
//! Tests cover:
//! - Loading a safetensors dataset through `ThreadedDataLoader`
//! - Inline and worker fetching producing identical batches
//! - Random sampling as a per-epoch permutation of the records
//! - Pipelines described as JSON

mod common;
use common::{to_vec_f32, to_vec_i64, Fixture};
use data_io::{
    create_batchify, create_dataset, create_iterator, data_error, kwargs, ComponentConfig,
    DataBatch, DataError, DataIter, DataIterExt,
};

use anyhow::Result;
use std::collections::BTreeSet;
use tch::Tensor;

fn loader(fixture: &Fixture, extra: &[(&str, &str)]) -> Result<Box<dyn DataIter<DataBatch>>> {
    let path = fixture.path_str();
    let mut pairs = vec![
        ("dataset", "NDArrayDataset"),
        ("dataset.path", path.as_str()),
    ];
    pairs.extend_from_slice(extra);
    let mut iter = create_iterator("ThreadedDataLoader")?;
    iter.init(&kwargs(pairs))?;
    Ok(iter)
}

fn labels(iter: &mut dyn DataIter<DataBatch>) -> Result<Vec<Vec<i64>>> {
    let mut out = Vec::new();
    iter.before_first()?;
    while iter.next()? {
        out.push(to_vec_i64(iter.value()?.get(1)?)?);
    }
    Ok(out)
}

#[test]
fn test_sequential_pipeline_over_safetensors() -> Result<()> {
    let fixture = Fixture::new(7)?;
    let mut iter = loader(
        &fixture,
        &[("sampler", "SequentialSampler"), ("sampler.batch_size", "3")],
    )?;
    assert_eq!(iter.len_hint(), 3);

    iter.before_first()?;
    assert!(iter.next()?);
    let batch = iter.value()?;
    assert_eq!(batch.index, vec![0, 1, 2]);
    assert_eq!(batch.num_batch_padd, 0);
    assert_eq!(batch.get(0)?.size(), vec![3, 2, 2]);
    assert_eq!(batch.get(1)?.size(), vec![3]);
    assert_eq!(
        to_vec_f32(batch.get(0)?)?,
        vec![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 2.0, 2.0, 2.0, 2.0]
    );

    assert!(iter.next()?);
    assert!(iter.next()?);
    let last = iter.value()?;
    // Round batching wraps to the start of the dataset.
    assert_eq!(last.index, vec![6, 0, 1]);
    assert_eq!(last.num_batch_padd, 2);
    assert_eq!(to_vec_i64(last.get(1)?)?, vec![60, 0, 10]);
    assert!(!iter.next()?);
    Ok(())
}

#[test]
fn test_workers_match_inline_fetching() -> Result<()> {
    let fixture = Fixture::new(23)?;
    let base = [
        ("sampler", "SequentialSampler"),
        ("sampler.batch_size", "4"),
        ("sampler.round_batch", "false"),
    ];
    let mut inline = loader(&fixture, &base)?;

    let mut threaded_args = base.to_vec();
    threaded_args.push(("num_workers", "3"));
    let mut threaded = loader(&fixture, &threaded_args)?;

    let expected = labels(inline.as_mut())?;
    assert_eq!(expected.len(), 6);
    assert_eq!(labels(threaded.as_mut())?, expected);
    // Second epoch reuses the same worker pool.
    assert_eq!(labels(threaded.as_mut())?, expected);
    Ok(())
}

#[test]
fn test_random_pipeline_permutes_records() -> Result<()> {
    let fixture = Fixture::new(10)?;
    let mut iter = loader(
        &fixture,
        &[
            ("sampler", "RandomSampler"),
            ("sampler.batch_size", "5"),
            ("sampler.seed", "17"),
            ("num_workers", "2"),
        ],
    )?;

    let first: Vec<i64> = labels(iter.as_mut())?.concat();
    let second: Vec<i64> = labels(iter.as_mut())?.concat();
    let all: BTreeSet<i64> = (0..10).map(|i| i * 10).collect();
    assert_eq!(first.iter().copied().collect::<BTreeSet<_>>(), all);
    assert_eq!(second.iter().copied().collect::<BTreeSet<_>>(), all);
    assert_ne!(first, second);
    Ok(())
}

#[test]
fn test_selected_keys_and_dtype() -> Result<()> {
    let fixture = Fixture::new(4)?;
    let mut iter = loader(
        &fixture,
        &[
            ("dataset.keys", "label"),
            ("sampler", "SequentialSampler"),
            ("sampler.batch_size", "2"),
            ("batchify.dtype", "float64"),
        ],
    )?;
    let batches: Vec<DataBatch> = iter.values().collect::<Result<_>>()?;
    assert_eq!(batches.len(), 2);
    for batch in &batches {
        assert_eq!(batch.data.len(), 1);
        assert_eq!(batch.get(0)?.kind(), tch::Kind::Double);
    }
    Ok(())
}

#[test]
fn test_missing_dataset_file() {
    let mut iter = create_iterator("ThreadedDataLoader").unwrap();
    let err = iter
        .init(&kwargs([
            ("dataset", "NDArrayDataset"),
            ("dataset.path", "/nonexistent/records.safetensors"),
            ("sampler", "SequentialSampler"),
            ("sampler.batch_size", "2"),
        ]))
        .unwrap_err();
    assert!(format!("{:#}", err).contains("NDArrayDataset"));
}

#[test]
fn test_dataset_access_by_name() -> Result<()> {
    let fixture = Fixture::new(5)?;
    let mut dataset = create_dataset("NDArrayDataset")?;
    dataset.init(&kwargs([("path", fixture.path_str())]))?;
    assert_eq!(dataset.len(), 5);
    assert_eq!(dataset.output_size(), 2);

    let label = dataset.get_item(3, 1)?;
    assert!(label.is_scalar());
    assert_eq!(label.scalar_value(), Some(30.0));
    assert!(!dataset.get_item(3, 0)?.is_scalar());

    let err = dataset.get_item(5, 0).unwrap_err();
    assert!(matches!(data_error(&err), Some(DataError::OutOfBounds { .. })));
    let err = dataset.get_item(0, 2).unwrap_err();
    assert!(matches!(data_error(&err), Some(DataError::OutOfBounds { .. })));
    Ok(())
}

#[test]
fn test_batchify_by_name() -> Result<()> {
    let mut stack = create_batchify("StackBatchify")?;
    stack.init(&[])?;
    let samples: Vec<Vec<Tensor>> = (0..3)
        .map(|i| vec![Tensor::from_slice(&[i as f32, 1.0]), Tensor::from(i as i64)])
        .collect();
    let out = stack.batchify(&samples)?;
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].size(), vec![3, 2]);
    assert_eq!(out[1].size(), vec![3]);

    let mut pad = create_batchify("PadBatchify")?;
    pad.init(&kwargs([("pad_val", "-1")]))?;
    let ragged = vec![
        vec![Tensor::from_slice(&[1i64, 2, 3])],
        vec![Tensor::from_slice(&[4i64])],
    ];
    let out = pad.batchify(&ragged)?;
    assert_eq!(to_vec_i64(&out[0])?, vec![1, 2, 3, 4, -1, -1]);
    Ok(())
}

#[test]
fn test_pipeline_from_json() -> Result<()> {
    let fixture = Fixture::new(6)?;
    let json = format!(
        r#"{{
            "name": "ThreadedDataLoader",
            "kwargs": [
                ["dataset", "NDArrayDataset"],
                ["dataset.path", {path:?}],
                ["sampler", "SequentialSampler"],
                ["sampler.batch_size", "2"],
                ["num_workers", "2"],
                ["prefetch_buffer", "1"]
            ]
        }}"#,
        path = fixture.path_str()
    );
    let mut iter = ComponentConfig::from_json(&json)?.build_iterator()?;
    assert_eq!(labels(iter.as_mut())?, vec![vec![0, 10], vec![20, 30], vec![40, 50]]);
    Ok(())
}
