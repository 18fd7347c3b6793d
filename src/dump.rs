//! # Dump
//!
//! Reads every entity from the admin API (and the hosted control plane when a
//! client for it is given) into a [`KongState`], in dependency order so every
//! reference resolves as entities are added.
//!
//! Scoped collections are followed per parent: targets per upstream, endpoint
//! permissions per RBAC role, members and plugin overrides per consumer group,
//! versions and documents per service package.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::client::AdminApi;
use crate::core::error::{SyncError, SyncResult};
use crate::entities::*;
use crate::state::KongState;

/// What a dump covers
#[derive(Debug, Clone, Default)]
pub struct DumpOptions {
    /// Only entities carrying all of these tags
    pub select_tags: Vec<String>,
    /// Leave out consumers, their credentials, memberships and consumer-scoped plugins
    pub skip_consumers: bool,
}

/// Collect the current state of the gateway
pub async fn dump(
    admin: &dyn AdminApi,
    konnect: Option<&dyn AdminApi>,
    options: &DumpOptions,
) -> SyncResult<KongState> {
    let mut state = KongState::new();
    let mut dumper = Dumper {
        state: &mut state,
        options,
    };

    dumper.collection::<Service>(admin, "/services").await?;
    dumper.collection::<Route>(admin, "/routes").await?;
    dumper.collection::<Upstream>(admin, "/upstreams").await?;
    for upstream in dumper.state.get_all::<Upstream>() {
        let Some(id) = upstream.id.clone() else { continue };
        let path = format!("/upstreams/{}/targets", encode(&id));
        dumper
            .scoped::<Target, _>(admin, &path, |target| target.upstream = Some(ForeignRef::by_id(id.as_str())))
            .await?;
    }
    dumper.collection::<Certificate>(admin, "/certificates").await?;
    dumper.collection::<Sni>(admin, "/snis").await?;
    dumper.collection::<CACertificate>(admin, "/ca_certificates").await?;

    if !options.skip_consumers {
        dumper.collection::<Consumer>(admin, "/consumers").await?;
        dumper.collection::<KeyAuth>(admin, "/key-auths").await?;
        dumper.collection::<BasicAuth>(admin, "/basic-auths").await?;
        dumper.collection::<HmacAuth>(admin, "/hmac-auths").await?;
        dumper.collection::<JwtAuth>(admin, "/jwts").await?;
        dumper.collection::<MtlsAuth>(admin, "/mtls-auths").await?;
        dumper.collection::<Oauth2Credential>(admin, "/oauth2").await?;
        dumper.collection::<AclGroup>(admin, "/acls").await?;
    }

    dumper.collection::<ConsumerGroup>(admin, "/consumer_groups").await?;
    for group in dumper.state.get_all::<ConsumerGroup>() {
        let Some(id) = group.id.clone() else { continue };
        if !options.skip_consumers {
            dumper.group_members(admin, &id).await?;
        }
        let path = format!("/consumer_groups/{}/overrides/plugins", encode(&id));
        dumper
            .scoped::<ConsumerGroupPlugin, _>(admin, &path, |plugin| {
                plugin.consumer_group = Some(ForeignRef::by_id(id.as_str()))
            })
            .await?;
    }

    dumper.collection::<Plugin>(admin, "/plugins").await?;

    dumper.collection::<RbacRole>(admin, "/rbac/roles").await?;
    for role in dumper.state.get_all::<RbacRole>() {
        let Some(id) = role.id.clone() else { continue };
        let path = format!("/rbac/roles/{}/endpoints", encode(&id));
        dumper
            .scoped::<RbacEndpointPermission, _>(admin, &path, |permission| {
                permission.role = Some(ForeignRef::by_id(id.as_str()))
            })
            .await?;
    }

    dumper.collection::<KeySet>(admin, "/key-sets").await?;
    dumper.collection::<Key>(admin, "/keys").await?;
    dumper.collection::<Vault>(admin, "/vaults").await?;
    dumper.collection::<License>(admin, "/licenses").await?;

    if let Some(konnect) = konnect {
        dumper.konnect(konnect).await?;
    }

    info!(entities = state.len(), "dumped current state");
    Ok(state)
}

struct Dumper<'a> {
    state: &'a mut KongState,
    options: &'a DumpOptions,
}

impl Dumper<'_> {
    async fn collection<E: Entity + Default>(&mut self, api: &dyn AdminApi, path: &str) -> SyncResult<()> {
        self.scoped::<E, _>(api, path, |_| {}).await
    }

    /// List `path` and add every item, after `scope` fills in the parent reference
    async fn scoped<E, F>(&mut self, api: &dyn AdminApi, path: &str, scope: F) -> SyncResult<()>
    where
        E: Entity + Default,
        F: Fn(&mut E) + Send,
    {
        let tags = self.tag_filter::<E>();
        let items = match api.list_all(path, tags).await {
            Ok(items) => items,
            // endpoint not offered by this gateway edition
            Err(e) if e.is_not_found() => {
                debug!(entity_type = %E::TYPE, path = %path, "collection not available");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        debug!(entity_type = %E::TYPE, count = items.len(), "listed");

        for item in items {
            let mut entity: E = serde_json::from_value(item)?;
            scope(&mut entity);
            if self.options.skip_consumers && scoped_to_consumer(&entity) {
                continue;
            }
            self.add(entity)?;
        }
        Ok(())
    }

    /// The members endpoint answers with consumer objects
    async fn group_members(&mut self, api: &dyn AdminApi, group_id: &str) -> SyncResult<()> {
        let path = format!("/consumer_groups/{}/consumers", encode(group_id));
        let members = match api.list_all(&path, &[]).await {
            Ok(members) => members,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e),
        };
        for member in members {
            let Some(consumer_id) = member.get("id").and_then(Value::as_str) else {
                continue;
            };
            self.add(ConsumerGroupConsumer {
                consumer_group: Some(ForeignRef::by_id(group_id)),
                consumer: Some(ForeignRef::by_id(consumer_id)),
                ..Default::default()
            })?;
        }
        Ok(())
    }

    async fn konnect(&mut self, api: &dyn AdminApi) -> SyncResult<()> {
        self.collection::<ServicePackage>(api, "/api/service_packages").await?;

        let relations = api.list_all("/api/control_plane_service_relations", &[]).await?;

        for package in self.state.get_all::<ServicePackage>() {
            let Some(package_id) = package.id.clone() else { continue };
            let path = format!("/api/service_packages/{}/service_versions", encode(&package_id));
            for item in api.list_all(&path, &[]).await? {
                let mut version: ServiceVersion = serde_json::from_value(item)?;
                version.service_package = Some(ForeignRef::by_id(package_id.as_str()));
                version.control_plane_service_relation = version
                    .id
                    .as_deref()
                    .and_then(|id| relation_for(&relations, id));
                self.add(version)?;
            }

            let path = format!("/api/service_packages/{}/documents", encode(&package_id));
            self.scoped::<Document, _>(api, &path, |doc| {
                doc.service_package = Some(ForeignRef::by_id(package_id.as_str()))
            })
            .await?;
        }

        for version in self.state.get_all::<ServiceVersion>() {
            let Some(version_id) = version.id.clone() else { continue };
            let path = format!("/api/service_versions/{}/documents", encode(&version_id));
            self.scoped::<Document, _>(api, &path, |doc| {
                doc.service_package = None;
                doc.service_version = Some(ForeignRef::by_id(version_id.as_str()));
            })
            .await?;
        }
        Ok(())
    }

    /// Tag filter for types that carry tags; the API rejects it for the others
    fn tag_filter<E: Entity + Default>(&self) -> &[String] {
        if E::default().tags_mut().is_some() {
            &self.options.select_tags
        } else {
            &[]
        }
    }

    /// Entities referencing something outside the dumped scope are left out
    fn add<E: Entity>(&mut self, entity: E) -> SyncResult<()> {
        let name = entity.friendly_name();
        match self.state.add(entity) {
            Ok(()) => Ok(()),
            Err(SyncError::Reference { message }) => {
                warn!(entity_type = %E::TYPE, entity = %name, reason = %message, "skipping entity outside the dumped scope");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn scoped_to_consumer<E: Entity>(entity: &E) -> bool {
    entity
        .foreign_refs()
        .iter()
        .any(|(entity_type, _)| *entity_type == EntityType::Consumer)
}

fn relation_for(relations: &[Value], version_id: &str) -> Option<ServiceRelation> {
    relations
        .iter()
        .find(|r| {
            r.get("service_version")
                .map(|v| v.get("id").unwrap_or(v))
                .and_then(Value::as_str)
                == Some(version_id)
        })
        .map(|r| ServiceRelation {
            id: r.get("id").and_then(Value::as_str).map(str::to_string),
            service: r
                .get("control_plane_entity_id")
                .and_then(Value::as_str)
                .map(ForeignRef::by_id),
            control_plane_id: r.get("control_plane_id").and_then(Value::as_str).map(str::to_string),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Page;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Serves canned pages; unknown paths answer 404
    #[derive(Default)]
    struct Canned {
        pages: HashMap<String, Vec<Page>>,
        requested_tags: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl Canned {
        fn with(mut self, path: &str, items: Vec<Value>) -> Self {
            self.pages.insert(
                path.to_string(),
                vec![Page {
                    data: items,
                    offset: None,
                }],
            );
            self
        }
    }

    #[async_trait]
    impl AdminApi for Canned {
        async fn get(&self, path: &str) -> SyncResult<Value> {
            Err(SyncError::NotFound {
                entity_type: "resource".to_string(),
                key: path.to_string(),
            })
        }

        async fn list_page(&self, path: &str, offset: Option<&str>, tags: &[String]) -> SyncResult<Page> {
            self.requested_tags
                .lock()
                .unwrap()
                .push((path.to_string(), tags.to_vec()));
            let pages = self.pages.get(path).ok_or_else(|| SyncError::NotFound {
                entity_type: "resource".to_string(),
                key: path.to_string(),
            })?;
            let index: usize = offset.map(|o| o.parse().unwrap()).unwrap_or(0);
            Ok(pages[index].clone())
        }

        async fn post(&self, _: &str, _: &Value) -> SyncResult<Value> {
            unimplemented!()
        }

        async fn put(&self, _: &str, _: &Value) -> SyncResult<Value> {
            unimplemented!()
        }

        async fn patch(&self, _: &str, _: &Value) -> SyncResult<Value> {
            unimplemented!()
        }

        async fn delete(&self, _: &str) -> SyncResult<()> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn test_dump_follows_pagination_and_scopes() {
        let mut api = Canned::default()
            .with("/upstreams", vec![json!({"id": "u1", "name": "backend"})])
            .with(
                "/upstreams/u1/targets",
                vec![json!({"id": "t1", "target": "10.0.0.1:80", "weight": 100, "created_at": 1.5})],
            )
            .with("/consumers", vec![json!({"id": "c1", "username": "alice"})])
            .with(
                "/key-auths",
                vec![json!({"id": "k1", "key": "abc", "consumer": {"id": "c1"}})],
            );
        api.pages.insert(
            "/services".to_string(),
            vec![
                Page {
                    data: vec![json!({"id": "s1", "name": "svc1", "host": "a"})],
                    offset: Some("1".to_string()),
                },
                Page {
                    data: vec![json!({"id": "s2", "name": "svc2", "host": "b"})],
                    offset: None,
                },
            ],
        );

        let state = dump(&api, None, &DumpOptions::default()).await.unwrap();
        assert_eq!(state.get_all::<Service>().len(), 2);

        let target: Target = state.get("t1").unwrap();
        assert_eq!(target.upstream.unwrap().name.as_deref(), Some("backend"));

        let key: KeyAuth = state.get("k1").unwrap();
        assert_eq!(key.consumer.unwrap().name.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_skip_consumers_and_tag_filter() {
        let api = Canned::default()
            .with("/services", vec![json!({"id": "s1", "name": "svc1", "host": "a"})])
            .with("/consumers", vec![json!({"id": "c1", "username": "alice"})])
            .with(
                "/plugins",
                vec![
                    json!({"id": "p1", "name": "cors", "service": {"id": "s1"}}),
                    json!({"id": "p2", "name": "acl", "consumer": {"id": "c1"}}),
                ],
            )
            .with("/rbac/roles", vec![json!({"id": "r1", "name": "admin"})])
            .with("/rbac/roles/r1/endpoints", vec![]);

        let options = DumpOptions {
            select_tags: vec!["team-a".to_string()],
            skip_consumers: true,
        };
        let state = dump(&api, None, &options).await.unwrap();
        assert!(state.get_all::<Consumer>().is_empty());
        let plugins = state.get_all::<Plugin>();
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].id.as_deref(), Some("p1"));

        let requested = api.requested_tags.lock().unwrap().clone();
        let tags_for = |path: &str| {
            requested
                .iter()
                .find(|(p, _)| p == path)
                .map(|(_, t)| t.clone())
                .unwrap()
        };
        assert_eq!(tags_for("/services"), vec!["team-a"]);
        assert!(tags_for("/rbac/roles").is_empty());
        assert!(!requested.iter().any(|(p, _)| p == "/consumers"));
    }

    #[tokio::test]
    async fn test_group_members_and_overrides() {
        let api = Canned::default()
            .with("/consumers", vec![json!({"id": "c1", "username": "alice"})])
            .with("/consumer_groups", vec![json!({"id": "g1", "name": "gold"})])
            .with(
                "/consumer_groups/g1/consumers",
                vec![json!({"id": "c1", "username": "alice"})],
            )
            .with(
                "/consumer_groups/g1/overrides/plugins",
                vec![json!({"id": "o1", "name": "rate-limiting-advanced", "config": {"limit": [5]}})],
            );

        let state = dump(&api, None, &DumpOptions::default()).await.unwrap();
        let members = state.get_all::<ConsumerGroupConsumer>();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].friendly_name(), "alice in gold");
        let overrides = state.get_all::<ConsumerGroupPlugin>();
        assert_eq!(overrides[0].consumer_group.as_ref().unwrap().id.as_deref(), Some("g1"));
    }
}
