//! Metrics definitions for the leaderboard.

use shared::metrics_defs::{MetricDef, MetricType};

pub const CACHE_HIT: MetricDef = MetricDef {
    name: "ranking_cache.hit",
    metric_type: MetricType::Counter,
    description: "Ranking reads served from a fresh cache entry",
};

pub const CACHE_MISS: MetricDef = MetricDef {
    name: "ranking_cache.miss",
    metric_type: MetricType::Counter,
    description: "Ranking reads that started a new load",
};

pub const CACHE_JOINED: MetricDef = MetricDef {
    name: "ranking_cache.joined",
    metric_type: MetricType::Counter,
    description: "Ranking reads that waited on a load already in flight",
};

pub const CACHE_LOAD_DURATION: MetricDef = MetricDef {
    name: "ranking_cache.load.duration",
    metric_type: MetricType::Histogram,
    description: "Time to fetch and compile the ranking in seconds",
};

pub const CACHE_LOAD_FAILED: MetricDef = MetricDef {
    name: "ranking_cache.load.failed",
    metric_type: MetricType::Counter,
    description: "Ranking loads that failed upstream",
};

pub const RANKING_DONORS: MetricDef = MetricDef {
    name: "ranking.donors",
    metric_type: MetricType::Gauge,
    description: "Donors in the most recently compiled ranking",
};

pub const DONATION_PAGES: MetricDef = MetricDef {
    name: "donation_feed.pages",
    metric_type: MetricType::Histogram,
    description: "Pages fetched from the donation feed per load",
};

pub const WEBHOOK_RECEIVED: MetricDef = MetricDef {
    name: "webhook.received",
    metric_type: MetricType::Counter,
    description: "Donation webhook calls. Tagged with outcome.",
};

pub const LEAD_CHANGED: MetricDef = MetricDef {
    name: "lead.changed",
    metric_type: MetricType::Counter,
    description: "Donations that put their donor in the lead",
};

pub const NOTIFICATION_SENT: MetricDef = MetricDef {
    name: "notification.sent",
    metric_type: MetricType::Counter,
    description: "Lead notifications sent. Tagged with message_type, status.",
};

pub const COSTUME_REGISTERED: MetricDef = MetricDef {
    name: "costume.registered",
    metric_type: MetricType::Counter,
    description: "New costume options added to the vote field",
};

pub const ALL_METRICS: &[MetricDef] = &[
    CACHE_HIT,
    CACHE_MISS,
    CACHE_JOINED,
    CACHE_LOAD_DURATION,
    CACHE_LOAD_FAILED,
    RANKING_DONORS,
    DONATION_PAGES,
    WEBHOOK_RECEIVED,
    LEAD_CHANGED,
    NOTIFICATION_SENT,
    COSTUME_REGISTERED,
];
