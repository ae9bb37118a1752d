//! Integration tests for the `buyer_schedule` and `pickup` query modules.

use serde_json::{Value, json};

use vinny_db::StorageError;
use vinny_db::queries::{cars, pickups, schedule};
use vinny_test_utils::{create_test_db, drop_test_db};

fn fields(entries: &[(&str, Value)]) -> Vec<(String, Value)> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[tokio::test]
async fn buyer_schedule_roundtrip_and_collision_lookup() {
    let (pool, db_name) = create_test_db().await;

    schedule::insert_buyer(&pool, 9, Some("Buyer Nine")).await.unwrap();
    assert!(schedule::buyer_exists(&pool, 9).await.unwrap());
    assert!(!schedule::buyer_exists(&pool, 10).await.unwrap());

    let slot = schedule::insert_slot(&pool, 9, "Inspection", "2025-01-02 10:00:00", "High")
        .await
        .expect("insert slot");
    assert_eq!(slot.buyer_id, 9);
    assert_eq!(slot.priority, "High");

    // Later time sorts after the earlier one.
    schedule::insert_slot(&pool, 9, "Pickup", "2025-01-03 09:00:00", "Medium")
        .await
        .unwrap();
    let slots = schedule::list_for_buyer(&pool, 9).await.unwrap();
    assert_eq!(slots.len(), 2);
    assert_eq!(slots[0].description, "Inspection");

    let existing = schedule::find_at_time(&pool, 9, "2025-01-02 10:00:00")
        .await
        .unwrap();
    assert_eq!(existing.map(|s| s.id), Some(slot.id));

    let free = schedule::find_at_time(&pool, 9, "2025-01-02 11:00:00")
        .await
        .unwrap();
    assert!(free.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn slot_for_unknown_buyer_is_integrity_error() {
    let (pool, db_name) = create_test_db().await;

    let err = schedule::insert_slot(&pool, 404, "Ghost", "2025-01-02 10:00:00", "Low")
        .await
        .expect_err("foreign key should fail");
    assert!(matches!(err, StorageError::Integrity(_)), "got {err:?}");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn pickup_roundtrip_and_sandbox_ids() {
    let (pool, db_name) = create_test_db().await;

    cars::insert(&pool, 7, &fields(&[("vin", json!("VIN-7"))])).await.unwrap();

    assert_eq!(pickups::next_sandbox_id(&pool).await.unwrap(), -1);
    let pickup = pickups::insert(
        &pool,
        -1,
        Some(7),
        &fields(&[
            ("address", json!("1 Elm St")),
            ("contact_phone", json!("+15550111")),
        ]),
    )
    .await
    .expect("insert pickup");
    assert_eq!(pickup.pick_up_id, -1);
    assert_eq!(pickup.car_id, Some(7));
    assert_eq!(pickups::next_sandbox_id(&pool).await.unwrap(), -2);

    let fetched = pickups::get_pickup(&pool, -1).await.unwrap();
    assert_eq!(fetched, Some(pickup));

    let for_car = pickups::list_for_car(&pool, 7).await.unwrap();
    assert_eq!(for_car.len(), 1);
    assert!(pickups::list_for_car(&pool, 8).await.unwrap().is_empty());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn pickup_update_whitelists_fields() {
    let (pool, db_name) = create_test_db().await;

    cars::insert(&pool, 7, &fields(&[("vin", json!("VIN-7"))])).await.unwrap();
    pickups::insert(&pool, -1, Some(7), &fields(&[("address", json!("1 Elm St"))]))
        .await
        .unwrap();

    let updated = pickups::update_fields(
        &pool,
        -1,
        &fields(&[
            ("address", json!("2 Oak Ave")),
            ("dropoff_time", json!("2025-02-01 08:00:00")),
            ("pick_up_id", json!(99)),
        ]),
    )
    .await
    .unwrap();
    assert_eq!(updated, 2, "pick_up_id is not a mutable column");

    let pickup = pickups::get_pickup(&pool, -1).await.unwrap().unwrap();
    assert_eq!(pickup.address.as_deref(), Some("2 Oak Ave"));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn pickup_with_unknown_car_is_integrity_error() {
    let (pool, db_name) = create_test_db().await;

    let err = pickups::insert(&pool, -1, Some(404), &[])
        .await
        .expect_err("foreign key should fail");
    assert!(matches!(err, StorageError::Integrity(_)), "got {err:?}");

    pool.close().await;
    drop_test_db(&db_name).await;
}
