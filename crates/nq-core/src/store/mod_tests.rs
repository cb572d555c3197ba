//! Tests for query filters and write planning.

use super::*;
use chrono::TimeZone;

mod query_filter {
    use super::*;

    #[test]
    fn test_parse_all_keys() {
        let filter = QueryFilter::parse(
            "crn=crn:v1::::::::&pnp_removed=false&source=demo&source_id=A1&type=incident&category=services",
        )
        .unwrap();

        assert_eq!(filter.crn.as_deref(), Some("crn:v1::::::::"));
        assert_eq!(filter.pnp_removed, Some(false));
        assert_eq!(filter.source.as_deref(), Some("demo"));
        assert_eq!(filter.source_id.as_deref(), Some("A1"));
        assert_eq!(filter.notification_type.as_deref(), Some("incident"));
        assert_eq!(filter.category.as_deref(), Some("services"));
        assert!(filter.specific_crn().is_none());
    }

    #[test]
    fn test_empty_query_has_no_constraints() {
        let filter: QueryFilter = "".parse().unwrap();
        assert_eq!(filter, QueryFilter::default());
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(matches!(
            QueryFilter::parse("color=red"),
            Err(StoreError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_bad_removed_flag_is_rejected() {
        assert!(matches!(
            QueryFilter::parse("pnp_removed=maybe"),
            Err(StoreError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_last_value_wins() {
        let filter = QueryFilter::parse("source=a&source=b").unwrap();
        assert_eq!(filter.source.as_deref(), Some("b"));
    }

    #[test]
    fn test_percent_encoded_values() {
        let filter = QueryFilter::parse("source_id=A%201&pnp_removed=TRUE").unwrap();
        assert_eq!(filter.source_id.as_deref(), Some("A 1"));
        assert_eq!(filter.pnp_removed, Some(true));
    }

    #[test]
    fn test_specific_crn_matches_rows() {
        let filter = QueryFilter::parse("crn=crn:v1:bluemix:public:cloudant:::::").unwrap();
        let hit = Notification::new("demo", "A1", "crn:v1:bluemix:public:cloudant:us-south::::");
        let miss = Notification::new("demo", "A2", "crn:v1:bluemix:public:kms:us-south::::");

        assert!(filter.matches(&hit));
        assert!(!filter.matches(&miss));
        assert!(filter.matches_attributes(&miss));
    }
}

mod planning {
    use super::*;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, 12, 0, 0).unwrap()
    }

    fn row(update: &str) -> Notification {
        let mut n = Notification::new("demo", "A1", crate::GENERIC_CRN);
        n.source_update_time = update.to_string();
        n
    }

    #[test]
    fn test_create_sets_identity_and_times() {
        let plan = plan_insert(None, &row("2024-01-01T00:00:00Z"), at(1)).unwrap();

        match plan {
            InsertPlan::Create(created) => {
                assert!(created.record_id.is_some());
                assert_eq!(created.pnp_creation_time, "2024-05-01T12:00:00.000000Z");
                assert_eq!(created.pnp_update_time, created.pnp_creation_time);
            }
            other => panic!("expected create, got {:?}", other),
        }
    }

    /// Verify equal source update times in different spellings count as unchanged.
    #[test]
    fn test_equal_instant_is_unchanged() {
        let mut current = row("2024-01-01T00:00:00Z");
        current.record_id = Some("r1".to_string());

        let plan = plan_insert(Some(&current), &row("2024-01-01 00:00:00"), at(2)).unwrap();

        assert_eq!(plan, InsertPlan::Unchanged { record_id: "r1".to_string() });
    }

    #[test]
    fn test_update_never_moves_pnp_time_backwards() {
        let mut current = row("2024-01-01T00:00:00Z");
        current.record_id = Some("r1".to_string());
        current.pnp_creation_time = "2024-05-01T12:00:00.000000Z".to_string();
        current.pnp_update_time = "2024-06-01T00:00:00.000000Z".to_string();

        let plan = plan_insert(Some(&current), &row("2024-01-02T00:00:00Z"), at(2)).unwrap();

        let InsertPlan::Update(updated) = plan else {
            panic!("expected update");
        };
        assert_eq!(updated.record_id.as_deref(), Some("r1"));
        assert_eq!(updated.pnp_creation_time, current.pnp_creation_time);
        assert_eq!(updated.pnp_update_time, "2024-06-01T00:00:00.000001Z");
    }

    #[test]
    fn test_sync_sibling_only_when_times_differ() {
        let written = row("2024-01-02T00:00:00Z");
        let stale = row("2024-01-01T00:00:00Z");

        assert!(sync_sibling(&written, &written, at(3)).is_none());
        let synced = sync_sibling(&stale, &written, at(3)).unwrap();
        assert_eq!(synced.source_update_time, "2024-01-02T00:00:00Z");
    }
}
