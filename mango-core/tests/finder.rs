mod common;

use std::sync::Arc;

use bson::{Bson, Document, doc};
use common::*;
use mango_core::{
    engine::QueryEngine,
    error::ErrorKind,
    facade::{MangoFinder, MangoFinderAsync},
    finder::MangoFinderOptions,
    query::SearchParams,
    document::Uid,
};
use mango_mingo::{Cursor, Mingo, MingoError, MingoOptions};
use futures::executor::block_on;

/// Matches on `make` alone and ignores every other criterion.
struct MakeIndex;

impl QueryEngine for MakeIndex {
    fn aggregate(
        &self,
        collection: &[Document],
        pipeline: &[Document],
        options: &MingoOptions,
    ) -> Result<Vec<Document>, MingoError> {
        Mingo::new().aggregate(collection, pipeline, options)
    }

    fn find<'a>(
        &self,
        collection: &'a [Document],
        criteria: &Document,
        _projection: &Document,
        _options: &MingoOptions,
    ) -> Result<Cursor<'a>, MingoError> {
        let make = criteria.get_str("make").ok();
        let matched = collection
            .iter()
            .enumerate()
            .filter(|(_, car)| make.is_none() || car.get_str("make").ok() == make)
            .map(|(index, _)| index)
            .collect();

        Ok(Cursor::from_matches(collection, matched))
    }
}

#[test]
fn find_matches_criteria() {
    let finder = MangoFinder::new(finder_options());
    let found = finder.find(doc! { "make": "Scion" }).unwrap();

    assert_eq!(found, vec![car(SCION)]);
}

#[test]
fn find_without_criteria_returns_everything_in_order() {
    let finder = MangoFinder::new(finder_options());
    assert_eq!(finder.find(SearchParams::default()).unwrap(), cars());
}

#[test]
fn projection_applies_before_matching() {
    let finder = MangoFinder::new(finder_options());
    let found = finder
        .find(doc! { "make": "Scion", "options": { "$project": { "make": 0 } } })
        .unwrap();

    assert_eq!(found, vec![doc! { "model": "tC", "model_year": 2010, "vin": SCION }]);
}

#[test]
fn pagination_sorts_then_skips_then_limits() {
    let finder = MangoFinder::new(finder_options());
    let params = SearchParams::default()
        .with_sort(doc! { "model_year": 1 })
        .with_skip(1)
        .with_limit(2);

    assert_eq!(vins(&finder.find(params).unwrap()), vec![SUBARU, MITSUBISHI]);
}

#[test]
fn zero_limit_means_no_limit() {
    let finder = MangoFinder::new(finder_options());
    assert_eq!(finder.find(SearchParams::default().with_limit(0)).unwrap().len(), 5);
}

#[test]
fn find_by_ids_keeps_only_requested_identities() {
    let finder = MangoFinder::new(finder_options());
    let uids = [Uid::from(NISSAN), Uid::from(SUBARU), Uid::from("bad-vin")];

    let found = finder
        .find_by_ids(&uids, SearchParams::default().with_sort(doc! { "make": -1 }))
        .unwrap();
    assert_eq!(vins(&found), vec![SUBARU, NISSAN]);

    let none = finder.find_by_ids(&uids, doc! { "model_year": { "$gt": 2000 } }).unwrap();
    assert!(none.is_empty());
}

#[test]
fn find_one_honors_criteria_and_projection() {
    let finder = MangoFinder::new(finder_options());
    let uid = Uid::from(CHEVROLET);

    assert_eq!(
        finder.find_one(&uid, SearchParams::default().with_project(doc! { "model": 1 })).unwrap(),
        Some(doc! { "vin": CHEVROLET, "model": "Aveo" }),
    );
    assert_eq!(finder.find_one(&uid, doc! { "make": "Scion" }).unwrap(), None);
}

#[test]
fn find_one_or_fail_reports_the_missing_identity() {
    let finder = MangoFinder::new(finder_options());
    let err = finder.find_one_or_fail(&Uid::from("bad-vin"), SearchParams::default()).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.code(), 404);
    assert!(err.message().contains("\"bad-vin\" does not exist"));
    assert_eq!(err.errors(), Some(&Bson::Document(doc! { "vin": "bad-vin" })));
    assert!(err.data().contains_key("params"));
}

#[test]
fn malformed_criteria_are_bad_requests_with_params() {
    let finder = MangoFinder::new(finder_options());
    let err = finder.find(doc! { "make": { "$bogus": 1 } }).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert_eq!(err.data().get_document("params").unwrap(), &doc! { "make": { "$bogus": 1 } });
}

#[test]
fn aggregate_runs_pipelines() {
    let finder = MangoFinder::new(finder_options());
    let grouped = finder
        .aggregate(vec![
            doc! { "$match": { "model_year": 1994 } },
            doc! { "$group": { "_id": "$model_year", "count": { "$sum": 1 } } },
        ])
        .unwrap();

    assert_eq!(grouped, vec![doc! { "_id": 1994, "count": 2 }]);
}

#[test]
fn aggregate_failures_carry_the_pipeline() {
    let finder = MangoFinder::new(finder_options());
    let err = finder.aggregate(doc! { "$unknown": {} }).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert_eq!(err.data().get_array("pipeline").unwrap().len(), 1);
}

#[test]
fn queries_are_translated_before_searching() {
    let finder = MangoFinder::new(finder_options());

    let recent = finder.query("model_year>2000&sort=-model_year").unwrap();
    assert_eq!(vins(&recent), vec![SCION, CHEVROLET]);

    let shaped = finder.query("make=Nissan,Subaru&fields=model&sort=model").unwrap();
    assert_eq!(shaped, vec![
        doc! { "vin": SUBARU, "model": "Impreza" },
        doc! { "vin": NISSAN, "model": "Quest" },
    ]);

    let paged = finder.query("sort=model_year&offset=3&limit=1").unwrap();
    assert_eq!(vins(&paged), vec![CHEVROLET]);
}

#[test]
fn query_one_variants_use_the_identity() {
    let finder = MangoFinder::new(finder_options());

    assert_eq!(finder.query_one(&Uid::from(SCION), "fields=make").unwrap(), Some(doc! { "vin": SCION, "make": "Scion" }));
    assert_eq!(finder.query_one(&Uid::from(SCION), "make=Subaru").unwrap(), None);
    assert_eq!(finder.query_by_ids(&[Uid::from(NISSAN)], "").unwrap(), vec![car(NISSAN)]);
    assert_eq!(
        finder.query_one_or_fail(&Uid::from("bad-vin"), "").unwrap_err().kind(),
        ErrorKind::NotFound,
    );
}

#[test]
fn custom_engines_answer_finds() {
    let finder = MangoFinder::new(finder_options()).with_engine(Arc::new(MakeIndex));

    assert_eq!(finder.find(doc! { "make": "Nissan", "model": "ignored" }).unwrap(), vec![car(NISSAN)]);
    assert_eq!(
        vins(&finder.find(SearchParams::default().with_sort(doc! { "model_year": -1 }).with_limit(2)).unwrap()),
        vec![SCION, CHEVROLET],
    );
    assert_eq!(
        finder.aggregate(doc! { "$match": { "make": "Subaru" } }).unwrap(),
        vec![car(SUBARU)],
    );
}

#[test]
fn malformed_queries_are_bad_requests() {
    let finder = MangoFinder::new(finder_options());
    let err = finder.query("q=anything").unwrap_err();

    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert!(err.data().contains_key("parser_options"));
}

#[test]
fn empty_finders_never_fail_reads() {
    let finder = MangoFinder::new(MangoFinderOptions::default());

    assert!(finder.find(doc! { "$nonsense": true }).unwrap().is_empty());
    assert!(finder.aggregate(doc! { "$nonsense": true }).unwrap().is_empty());
    assert_eq!(finder.uid(), "id");
}

#[test]
fn reads_are_idempotent_and_never_replace_the_cache() {
    let finder = MangoFinder::new(finder_options());
    let before = finder.cache().clone();
    let params = SearchParams::new(doc! { "model_year": { "$lt": 2000 } }).with_sort(doc! { "model": 1 });

    let first = finder.find(params.clone()).unwrap();
    let second = finder.find(params).unwrap();

    assert_eq!(first, second);
    assert!(finder.cache().ptr_eq(&before));
}

#[test]
fn set_cache_publishes_a_new_snapshot() {
    let mut finder = MangoFinder::new(finder_options());
    let old = finder.cache().clone();
    let fresh: Vec<Document> = cars().into_iter().take(2).collect();

    let new = finder.set_cache(fresh.clone());

    assert_eq!(new.collection(), fresh.as_slice());
    assert!(!new.ptr_eq(&old));
    assert_eq!(old.collection(), cars().as_slice());
    assert_eq!(finder.find(SearchParams::default()).unwrap(), fresh);
}

#[test]
fn async_finder_matches_the_sync_one() {
    let sync = MangoFinder::new(finder_options());
    let mut finder = MangoFinderAsync::new(finder_options());

    block_on(async {
        assert_eq!(
            finder.query("make=Scion").await.unwrap(),
            sync.query("make=Scion").unwrap(),
        );
        assert_eq!(
            finder.find_one(&Uid::from(SUBARU), SearchParams::default()).await.unwrap(),
            Some(car(SUBARU)),
        );

        let err = finder.find_one_or_fail(&Uid::from("bad-vin"), SearchParams::default()).await.unwrap_err();
        assert!(err.message().contains("\"bad-vin\" does not exist"));

        finder.set_cache(Vec::new()).await;
        assert!(finder.find(SearchParams::default()).await.unwrap().is_empty());
    });
}
