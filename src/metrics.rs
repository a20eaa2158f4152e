use metrics::{describe_counter, describe_gauge, register_counter, register_gauge, Counter, Gauge};
use once_cell::sync::Lazy;

pub static DATABASE_COUNT: Lazy<Gauge> = Lazy::new(|| {
    const NAME: &str = "ltx_store_database_count";
    describe_gauge!(NAME, "number of databases tracked by the store");
    register_gauge!(NAME)
});

pub static SUBSCRIBER_COUNT: Lazy<Gauge> = Lazy::new(|| {
    const NAME: &str = "ltx_store_subscriber_count";
    describe_gauge!(NAME, "number of active subscribers");
    register_gauge!(NAME)
});

pub static IS_PRIMARY: Lazy<Gauge> = Lazy::new(|| {
    const NAME: &str = "ltx_store_is_primary";
    describe_gauge!(NAME, "1 if this node currently holds the primary lease");
    register_gauge!(NAME)
});

pub static LTX_FILES_APPLIED: Lazy<Counter> = Lazy::new(|| {
    const NAME: &str = "ltx_store_ltx_files_applied_total";
    describe_counter!(NAME, "number of LTX files applied across all databases");
    register_counter!(NAME)
});

pub static LTX_FILE_COUNT: Lazy<Gauge> = Lazy::new(|| {
    const NAME: &str = "ltx_store_ltx_file_count";
    describe_gauge!(NAME, "number of LTX files currently retained for a database");
    register_gauge!(NAME)
});

pub static LATEST_LTX_FILE_SIZE: Lazy<Gauge> = Lazy::new(|| {
    const NAME: &str = "ltx_store_latest_ltx_file_size_bytes";
    describe_gauge!(NAME, "size in bytes of the most recently applied LTX file");
    register_gauge!(NAME)
});

pub static HALT_LOCKS_HELD: Lazy<Gauge> = Lazy::new(|| {
    const NAME: &str = "ltx_store_halt_locks_held";
    describe_gauge!(NAME, "number of databases with a remotely-held HALT lock");
    register_gauge!(NAME)
});
