mod common;

use chrono::{Duration, Utc};
use common::{coupon_fixture, TestApp};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, Set};
use uuid::Uuid;

use checkout_api::{
    entities::coupon::{CouponType, DiscountType},
    entities::coupon_usage,
    errors::{CouponError, ServiceError},
    services::RedeemerKey,
};

fn user() -> RedeemerKey {
    RedeemerKey::User(Uuid::new_v4())
}

fn assert_coupon_err(err: ServiceError, expected: CouponError) {
    match err {
        ServiceError::Coupon(actual) => assert_eq!(actual, expected),
        other => panic!("expected {expected:?}, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_codes_are_not_found() {
    let app = TestApp::new().await;
    let err = app
        .state
        .services
        .coupons
        .preview("NOPE", dec!(100), &user())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn lookup_is_case_insensitive() {
    let app = TestApp::new().await;
    app.insert_coupon(coupon_fixture("SAVE10", CouponType::OneTime))
        .await;

    let (coupon, discount) = app
        .state
        .services
        .coupons
        .preview("  save10 ", dec!(100), &user())
        .await
        .unwrap();
    assert_eq!(coupon.code, "SAVE10");
    assert_eq!(discount, dec!(10));
}

#[tokio::test]
async fn expired_and_upcoming_windows_are_rejected() {
    let app = TestApp::new().await;

    let mut expired = coupon_fixture("OLD", CouponType::OneTime);
    expired.end_date = Set(Utc::now() - Duration::days(1));
    app.insert_coupon(expired).await;

    let mut disabled = coupon_fixture("OFF", CouponType::OneTime);
    disabled.is_active = Set(false);
    app.insert_coupon(disabled).await;

    let mut upcoming = coupon_fixture("SOON", CouponType::OneTime);
    upcoming.start_date = Set(Utc::now() + Duration::days(1));
    app.insert_coupon(upcoming).await;

    let coupons = &app.state.services.coupons;
    let redeemer = user();
    assert_coupon_err(
        coupons.preview("OLD", dec!(100), &redeemer).await.unwrap_err(),
        CouponError::Expired,
    );
    assert_coupon_err(
        coupons.preview("OFF", dec!(100), &redeemer).await.unwrap_err(),
        CouponError::Expired,
    );
    assert_coupon_err(
        coupons.preview("SOON", dec!(100), &redeemer).await.unwrap_err(),
        CouponError::NotYetActive,
    );
}

#[tokio::test]
async fn personal_coupons_require_their_owner() {
    let app = TestApp::new().await;
    let owner = Uuid::new_v4();

    let mut personal = coupon_fixture("MINE", CouponType::OneTime);
    personal.is_system_coupon = Set(false);
    personal.user_id = Set(Some(owner));
    app.insert_coupon(personal).await;

    let coupons = &app.state.services.coupons;

    assert_coupon_err(
        coupons
            .preview("MINE", dec!(100), &RedeemerKey::User(Uuid::new_v4()))
            .await
            .unwrap_err(),
        CouponError::NotAuthorized,
    );
    assert_coupon_err(
        coupons
            .preview("MINE", dec!(100), &RedeemerKey::Session("anon".into()))
            .await
            .unwrap_err(),
        CouponError::NotAuthorized,
    );

    let (coupon, _) = coupons
        .preview("MINE", dec!(100), &RedeemerKey::User(owner))
        .await
        .unwrap();
    assert_eq!(coupon.user_id, Some(owner));
}

#[tokio::test]
async fn minimum_order_amount_is_enforced() {
    let app = TestApp::new().await;
    let mut coupon = coupon_fixture("BIG", CouponType::OneTime);
    coupon.min_order_amount = Set(Some(dec!(50)));
    app.insert_coupon(coupon).await;

    assert_coupon_err(
        app.state
            .services
            .coupons
            .preview("BIG", dec!(49.99), &user())
            .await
            .unwrap_err(),
        CouponError::MinimumNotMet { minimum: dec!(50) },
    );
}

#[tokio::test]
async fn global_usage_limit_is_enforced() {
    let app = TestApp::new().await;
    let mut coupon = coupon_fixture("CAPPED", CouponType::OneTime);
    coupon.max_usage_count = Set(Some(3));
    coupon.usage_count = Set(3);
    app.insert_coupon(coupon).await;

    assert_coupon_err(
        app.state
            .services
            .coupons
            .preview("CAPPED", dec!(100), &user())
            .await
            .unwrap_err(),
        CouponError::UsageLimitReached,
    );
}

#[tokio::test]
async fn one_time_coupons_reject_a_second_redemption() {
    let app = TestApp::new().await;
    let coupon = app
        .insert_coupon(coupon_fixture("ONCE", CouponType::OneTime))
        .await;
    let redeemer = user();

    coupon_usage::ActiveModel {
        id: Set(Uuid::new_v4()),
        coupon_id: Set(coupon.id),
        redeemer_key: Set(redeemer.as_key()),
        one_time_key: Set(Some(redeemer.as_key())),
        order_id: Set(Uuid::new_v4()),
        amount_discounted: Set(dec!(10)),
        used_at: Set(Utc::now()),
    }
    .insert(&*app.state.db)
    .await
    .unwrap();

    assert_coupon_err(
        app.state
            .services
            .coupons
            .preview("ONCE", dec!(100), &redeemer)
            .await
            .unwrap_err(),
        CouponError::AlreadyUsed,
    );

    // A different redeemer is still allowed.
    assert!(app
        .state
        .services
        .coupons
        .preview("ONCE", dec!(100), &user())
        .await
        .is_ok());
}

#[tokio::test]
async fn gradual_coupons_with_no_balance_are_exhausted() {
    let app = TestApp::new().await;
    let mut coupon = coupon_fixture("DRAINED", CouponType::Gradual);
    coupon.remaining_balance = Set(Some(dec!(0)));
    app.insert_coupon(coupon).await;

    assert_coupon_err(
        app.state
            .services
            .coupons
            .preview("DRAINED", dec!(100), &user())
            .await
            .unwrap_err(),
        CouponError::BalanceExhausted,
    );
}

#[tokio::test]
async fn percentage_discount_respects_the_cap() {
    let app = TestApp::new().await;
    let mut coupon = coupon_fixture("PCT10", CouponType::OneTime);
    coupon.discount_type = Set(DiscountType::Percentage);
    coupon.discount_value = Set(dec!(10));
    coupon.max_discount_amount = Set(Some(dec!(5)));
    app.insert_coupon(coupon).await;

    let (_, discount) = app
        .state
        .services
        .coupons
        .preview("PCT10", dec!(100), &user())
        .await
        .unwrap();
    assert_eq!(discount, dec!(5));
}

#[tokio::test]
async fn stale_usage_counter_aborts_apply_with_a_conflict() {
    let app = TestApp::new().await;
    let mut fixture = coupon_fixture("LIMIT1", CouponType::Gradual);
    fixture.max_usage_count = Set(Some(1));
    let stale = app.insert_coupon(fixture).await;

    // A competing redemption exhausts the limit after our copy was read.
    {
        use sea_orm::IntoActiveModel;
        let mut active = stale.clone().into_active_model();
        active.usage_count = Set(1);
        active.update(&*app.state.db).await.unwrap();
    }

    let err = app
        .state
        .services
        .coupons
        .apply(&*app.state.db, &stale, dec!(5), &user(), Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)), "got {err:?}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn overdrawing_the_balance_aborts_apply_with_a_conflict() {
    let app = TestApp::new().await;
    let mut fixture = coupon_fixture("LOWBAL", CouponType::Gradual);
    fixture.remaining_balance = Set(Some(dec!(4)));
    let stale = app.insert_coupon(fixture).await;

    // Drawing more than the stored balance must not go through, no matter
    // what the caller's copy of the coupon claims.
    let err = app
        .state
        .services
        .coupons
        .apply(&*app.state.db, &stale, dec!(10), &user(), Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)), "got {err:?}");
}

#[tokio::test]
async fn codes_cannot_coexist_across_casings() {
    let app = TestApp::new().await;
    app.insert_coupon(coupon_fixture("DUP", CouponType::OneTime))
        .await;

    let mut clash = coupon_fixture("PLACEHOLDER", CouponType::OneTime);
    clash.code = Set("dup".to_string());
    assert!(clash.insert(&*app.state.db).await.is_err());
}

#[tokio::test]
async fn gradual_discount_is_capped_by_remaining_balance() {
    let app = TestApp::new().await;
    let mut coupon = coupon_fixture("TOPUP", CouponType::Gradual);
    coupon.discount_value = Set(dec!(40));
    coupon.remaining_balance = Set(Some(dec!(25.50)));
    app.insert_coupon(coupon).await;

    let (_, discount) = app
        .state
        .services
        .coupons
        .preview("TOPUP", dec!(100), &user())
        .await
        .unwrap();
    assert_eq!(discount, dec!(25.50));
}
