use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;

/// One engine, WAL and compactor per tenant. A tenant is the database name
/// a pgwire client connects to.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

/// Tenant name reduced to characters safe for a file name.
fn sanitize(tenant: &str) -> String {
    tenant
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Get or lazily create the engine for `tenant`, replaying its WAL.
    pub fn get_or_create(&self, tenant: &str) -> io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "tenant name too long"));
        }
        if self.engines.len() >= MAX_TENANTS {
            return Err(io::Error::other("too many tenants"));
        }
        let safe_name = sanitize(tenant);
        if safe_name.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty tenant name"));
        }

        // The entry lock keeps two first connections from replaying the same WAL twice.
        let engine = match self.engines.entry(tenant.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(e) => return Ok(e.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let wal_path = self.data_dir.join(format!("{safe_name}.wal"));
                let engine = Arc::new(Engine::new(wal_path)?);
                tokio::spawn(compactor::run_compactor(engine.clone(), self.compact_threshold));
                slot.insert(engine.clone());
                engine
            }
        };

        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        tracing::info!("tenant {tenant:?} loaded");
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::NaiveDate;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roombook_test_tenant").join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let tm = TenantManager::new(test_data_dir("isolation"), 1000);
        let eng_a = tm.get_or_create("tenant_a").unwrap();
        let eng_b = tm.get_or_create("tenant_b").unwrap();

        let rid = Ulid::new();
        let date = NaiveDate::from_ymd_opt(2026, 10, 20).unwrap();
        for eng in [&eng_a, &eng_b] {
            eng.create_resource(rid, "Room".into(), Span::new(480, 960), true)
                .await
                .unwrap();
        }
        eng_a
            .create_booking(Ulid::new(), rid, date, 540, 600, vec![], ApprovalStatus::Pending)
            .await
            .unwrap();

        assert_eq!(
            eng_a.compute_free_intervals(rid, date, None).await.unwrap(),
            vec![Span::new(480, 540), Span::new(600, 960)]
        );
        assert_eq!(
            eng_b.compute_free_intervals(rid, date, None).await.unwrap(),
            vec![Span::new(480, 960)]
        );
    }

    #[tokio::test]
    async fn tenant_lazy_creation() {
        let dir = test_data_dir("lazy");
        let tm = TenantManager::new(dir.clone(), 1000);
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);

        tm.get_or_create("my_db").unwrap();
        assert!(dir.join("my_db.wal").exists());
    }

    #[tokio::test]
    async fn tenant_same_engine_returned() {
        let tm = TenantManager::new(test_data_dir("same_eng"), 1000);
        let eng1 = tm.get_or_create("foo").unwrap();
        let eng2 = tm.get_or_create("foo").unwrap();
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn tenant_name_sanitized() {
        let dir = test_data_dir("sanitize");
        let tm = TenantManager::new(dir.clone(), 1000);

        tm.get_or_create("../evil").unwrap();
        assert!(dir.join("evil.wal").exists());

        assert!(tm.get_or_create("../..").is_err());
    }

    #[tokio::test]
    async fn tenant_name_too_long() {
        let tm = TenantManager::new(test_data_dir("name_too_long"), 1000);
        let err = tm.get_or_create(&"x".repeat(MAX_TENANT_NAME_LEN + 1)).err().unwrap();
        assert!(err.to_string().contains("tenant name too long"));
    }

    #[tokio::test]
    async fn tenant_survives_restart() {
        let dir = test_data_dir("restart");
        let rid = Ulid::new();
        {
            let tm = TenantManager::new(dir.clone(), 1000);
            tm.get_or_create("campus")
                .unwrap()
                .create_resource(rid, "Aula".into(), Span::new(420, 1200), true)
                .await
                .unwrap();
        }
        let tm = TenantManager::new(dir, 1000);
        let r = tm.get_or_create("campus").unwrap().get_resource(&rid).await.unwrap();
        assert_eq!(r.name, "Aula");
    }

    #[test]
    fn sanitize_keeps_safe_characters() {
        assert_eq!(sanitize("north-campus_2"), "north-campus_2");
        assert_eq!(sanitize("a/b\\c.d"), "abcd");
    }
}
