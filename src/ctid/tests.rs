//! Tests for ctid module

use super::*;
use crate::types::StreamDescriptor;
use pretty_assertions::assert_eq;
use test_case::test_case;

// ============================================================================
// Ctid Tests
// ============================================================================

#[test]
fn test_ctid_parse_and_display() {
    let ctid = Ctid::parse("(12,3)").unwrap();
    assert_eq!(ctid, Ctid::new(12, 3));
    assert_eq!(ctid.to_string(), "(12,3)");
}

#[test_case("(0,1)", 0, 1 ; "plain")]
#[test_case(" ( 7 , 42 ) ", 7, 42 ; "whitespace")]
#[test_case("tid 5 9 extra 11", 5, 9 ; "first two runs only")]
fn test_ctid_parse_integer_runs(text: &str, page: u64, tuple: u64) {
    assert_eq!(Ctid::parse(text).unwrap(), Ctid::new(page, tuple));
}

#[test_case("" ; "empty")]
#[test_case("(12)" ; "single run")]
#[test_case("(a,b)" ; "no digits")]
fn test_ctid_parse_rejects(text: &str) {
    assert!(matches!(
        Ctid::parse(text),
        Err(crate::Error::InvalidCtid { .. })
    ));
}

#[test]
fn test_ctid_ordering() {
    assert!(Ctid::new(1, 200) < Ctid::new(2, 1));
    assert!(Ctid::new(2, 1) < Ctid::new(2, 2));
    assert!(Ctid::ZERO < Ctid::new(0, 1));
}

#[test]
fn test_ctid_serde_as_text() {
    let json = serde_json::to_string(&Ctid::new(3, 4)).unwrap();
    assert_eq!(json, "\"(3,4)\"");
    let back: Ctid = serde_json::from_str(&json).unwrap();
    assert_eq!(back, Ctid::new(3, 4));
}

#[test]
fn test_chunk_range_contains() {
    let range = ChunkRange::bounded(Ctid::new(0, 5), Ctid::new(2, 0));
    assert!(!range.contains(Ctid::new(0, 5)));
    assert!(range.contains(Ctid::new(0, 6)));
    assert!(range.contains(Ctid::new(1, 100)));
    assert!(!range.contains(Ctid::new(2, 1)));

    let open = ChunkRange::unbounded(Ctid::new(2, 0));
    assert!(open.contains(Ctid::new(1_000_000, 1)));
    assert!(!open.contains(Ctid::new(1, 1)));
}

// ============================================================================
// Planner Tests
// ============================================================================

#[test]
fn test_plan_three_pages_two_per_chunk() {
    let ranges = plan(Ctid::ZERO, 3 * 8192, 8192, 2 * 8192);
    assert_eq!(
        ranges,
        vec![
            ChunkRange::bounded(Ctid::new(0, 0), Ctid::new(2, 0)),
            ChunkRange::unbounded(Ctid::new(2, 0)),
        ]
    );
}

#[test]
fn test_plan_start_beyond_estimate_is_single_open_range() {
    let start = Ctid::new(50, 7);
    let ranges = plan(start, 3 * 8192, 8192, 2 * 8192);
    assert_eq!(ranges, vec![ChunkRange::unbounded(start)]);
}

#[test]
fn test_plan_empty_table() {
    let ranges = plan(Ctid::ZERO, 0, 8192, 1 << 30);
    assert_eq!(ranges, vec![ChunkRange::unbounded(Ctid::ZERO)]);
}

#[test]
fn test_plan_chunk_smaller_than_page_uses_one_page() {
    let planner = ChunkPlanner::new(8192, 100);
    assert_eq!(planner.pages_per_chunk(), 1);
    let ranges = planner.plan(Ctid::ZERO, 2 * 8192);
    assert_eq!(ranges.len(), 3);
    assert_eq!(ranges[0], ChunkRange::bounded(Ctid::ZERO, Ctid::new(1, 0)));
}

#[test]
fn test_plan_resume_keeps_tuple_only_in_first_range() {
    let ranges = plan(Ctid::new(1, 17), 10 * 8192, 8192, 3 * 8192);
    assert_eq!(ranges[0].lower, Ctid::new(1, 17));
    for range in &ranges[1..] {
        assert_eq!(range.lower.tuple, 0);
    }
}

#[test_case(0, 8192, 8192, Ctid::ZERO ; "empty")]
#[test_case(3 * 8192, 8192, 2 * 8192, Ctid::ZERO ; "three pages")]
#[test_case(100 * 8192, 8192, 7 * 8192, Ctid::new(13, 4) ; "resume mid page")]
#[test_case(64 * 8192, 8192, 64 * 8192, Ctid::ZERO ; "exact fit")]
#[test_case(1_000 * 4096, 4096, 10_000, Ctid::new(999, 1) ; "small pages near end")]
#[test_case(5 * 8192 + 17, 8192, 1, Ctid::new(2, 0) ; "tiny target")]
fn test_plan_ranges_are_disjoint_increasing_and_cover(
    table_size: u64,
    page_size: u64,
    target: u64,
    start: Ctid,
) {
    let ranges = plan(start, table_size, page_size, target);

    assert!(!ranges.is_empty());
    assert_eq!(ranges[0].lower, start);
    assert!(ranges.last().unwrap().is_unbounded());
    assert_eq!(ranges.iter().filter(|r| r.is_unbounded()).count(), 1);

    for pair in ranges.windows(2) {
        let upper = pair[0].upper.expect("only the last range is open");
        assert!(pair[0].lower < upper);
        // Contiguous: the next range starts exactly where this one ends
        assert_eq!(pair[1].lower, upper);
    }

    // No range re-reads the resume point
    for range in &ranges {
        assert!(!range.contains(start));
    }
}

// ============================================================================
// Query Tests
// ============================================================================

fn users() -> StreamDescriptor {
    StreamDescriptor::new("public", "users")
}

#[test]
fn test_tid_range_predicate() {
    let range = ChunkRange::bounded(Ctid::new(0, 0), Ctid::new(2, 0));
    assert_eq!(
        range_predicate(&range, ScanMode::TidRange),
        "t.ctid > '(0,0)'::tid AND t.ctid <= '(2,0)'::tid"
    );
}

#[test]
fn test_unbounded_predicate_has_no_upper() {
    let range = ChunkRange::unbounded(Ctid::new(4, 2));
    let legacy = ScanMode::Legacy {
        max_tuples_per_page: 291,
    };
    assert_eq!(
        range_predicate(&range, ScanMode::TidRange),
        "t.ctid > '(4,2)'::tid"
    );
    assert_eq!(range_predicate(&range, legacy), "t.ctid > '(4,2)'::tid");
}

#[test]
fn test_legacy_predicate_enumerates_pages() {
    let range = ChunkRange::bounded(Ctid::new(2, 5), Ctid::new(4, 0));
    let sql = range_predicate(
        &range,
        ScanMode::Legacy {
            max_tuples_per_page: 291,
        },
    );
    assert!(sql.starts_with("t.ctid = ANY (ARRAY (SELECT FORMAT('(%s,%s)', page, tuple)::tid"));
    assert!(sql.contains("generate_series(2, 3) AS page"));
    assert!(sql.contains("generate_series(1, 291) AS tuple"));
    assert!(sql.ends_with("AND t.ctid > '(2,5)'::tid AND t.ctid <= '(4,0)'::tid"));
}

#[test]
fn test_select_query_projects_ctid_and_columns() {
    let query = ChunkQuery::new(
        &users(),
        &["id".to_string(), "name".to_string()],
        ChunkRange::unbounded(Ctid::ZERO),
        0,
        ScanMode::TidRange,
        Projection::Columns,
    );
    assert_eq!(
        query.sql,
        "SELECT t.ctid::text AS \"ctid\", t.\"id\", t.\"name\" FROM \"public\".\"users\" AS t \
         WHERE t.ctid > '(0,0)'::tid"
    );
}

#[test]
fn test_json_query_and_copy_statement() {
    let query = ChunkQuery::new(
        &users(),
        &["id".to_string()],
        ChunkRange::bounded(Ctid::ZERO, Ctid::new(8, 0)),
        1,
        ScanMode::TidRange,
        Projection::JsonText,
    );
    assert!(query
        .sql
        .starts_with("SELECT json_build_object('ctid', t.ctid::text, 'id', t.\"id\")::text"));
    assert_eq!(
        query.copy_statement(),
        format!("COPY ({}) TO STDOUT WITH (FORMAT binary)", query.sql)
    );
}

#[test]
fn test_json_query_without_columns_uses_whole_row() {
    let query = ChunkQuery::new(
        &users(),
        &[],
        ChunkRange::unbounded(Ctid::ZERO),
        0,
        ScanMode::TidRange,
        Projection::JsonText,
    );
    assert!(query
        .sql
        .contains("(jsonb_build_object('ctid', t.ctid::text) || to_jsonb(t))::text"));
}
