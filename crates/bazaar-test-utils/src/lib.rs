//! Testing utilities for the ProductBazar workspace
//!
//! Shared fixtures: request headers, catalog seeding and a fixed clock origin.

#![allow(missing_docs)]

use bazaar_model::{
    CategoryId, ClientInfo, Preferences, Product, ProductId, ProductStatus, User, UserId,
};
use bazaar_store::{Catalog, ManualClock};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

pub const GOOGLEBOT_UA: &str = "Mozilla/5.0 (compatible; Googlebot/2.1)";
pub const FIREFOX_UA: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:130.0) Gecko/20100101 Firefox/130.0";

/// Fixed origin for clock-driven tests: a Wednesday at noon
pub fn origin() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 12, 12, 0, 0).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(origin()))
}

pub fn days_before(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    now - Duration::days(days)
}

/// Browser request with the usual headers from `198.51.100.{host}`
pub fn browser_from(host: u8) -> ClientInfo {
    ClientInfo::new()
        .with_ip(IpAddr::V4(Ipv4Addr::new(198, 51, 100, host)))
        .with_header("User-Agent", FIREFOX_UA)
        .with_header("Accept", "text/html,application/json")
        .with_header("Accept-Language", "en-US,en;q=0.9")
        .with_header("Accept-Encoding", "gzip, br")
}

pub fn browser() -> ClientInfo {
    browser_from(7)
}

/// Crawler request as seen in the wild
pub fn googlebot() -> ClientInfo {
    ClientInfo::new()
        .with_ip(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 9)))
        .with_header("User-Agent", GOOGLEBOT_UA)
        .with_header("Accept", "*/*")
        .with_header("Accept-Encoding", "gzip")
}

/// Published public product
pub fn product(id: &str, maker: &str, category: &str) -> Product {
    Product::new(
        ProductId::from(id),
        id,
        UserId::from(maker),
        CategoryId::from(category),
    )
    .with_name(id)
    .with_category_name(category)
    .with_status(ProductStatus::Published)
}

pub fn user(id: &str) -> User {
    User::new(UserId::from(id), id)
}

pub fn user_with_interest(id: &str, category: &str) -> User {
    user(id).with_preferences(Preferences::new().with_category(category, 1.0))
}

/// Catalog with `per_category` published products in each category, each by
/// its own maker, created one hour apart going back from `now`
pub fn seeded_catalog(categories: &[&str], per_category: usize, now: DateTime<Utc>) -> Arc<Catalog> {
    let catalog = Arc::new(Catalog::new());
    let mut n = 0;
    for category in categories {
        for _ in 0..per_category {
            let id = format!("{category}-{n}");
            let created = now - Duration::hours(n as i64 + 1);
            catalog
                .insert_product(product(&id, &format!("maker-{n}"), category).created_at(created))
                .unwrap();
            n += 1;
        }
    }
    catalog
}
