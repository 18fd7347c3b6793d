//! # Declarative State Files
//!
//! Loads YAML or JSON state files into a target [`KongState`] and renders a
//! state back into the same format.
//!
//! Entities may be listed at the top level or nested under their parent:
//! routes and plugins under services, plugins under routes, credentials,
//! plugins and group names under consumers, targets under upstreams, SNIs under
//! certificates, members and plugin overrides under consumer groups, endpoint
//! permissions under RBAC roles, versions and documents under service packages.
//! References are written as a name or ID string.
//!
//! While loading, defaults the gateway would materialize are filled in and the
//! configured select tags are appended, so a re-sync against a gateway that
//! stores those values is a no-op.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::debug;
use url::Url;

use crate::core::error::{SyncError, SyncResult};
use crate::entities::*;
use crate::state::KongState;

/// How declared entities are prepared before they enter the target state
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Appended to every entity that carries tags and lacks them
    pub select_tags: Vec<String>,
    /// Drop consumers and everything scoped to them
    pub skip_consumers: bool,
    /// Control plane for service version relations that do not name one
    pub control_plane_id: Option<String>,
}

/// Contents of one state file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StateFile {
    services: Vec<FileService>,
    routes: Vec<FileRoute>,
    upstreams: Vec<FileUpstream>,
    targets: Vec<Target>,
    certificates: Vec<FileCertificate>,
    snis: Vec<Sni>,
    ca_certificates: Vec<CACertificate>,
    consumers: Vec<FileConsumer>,
    keyauth_credentials: Vec<KeyAuth>,
    basicauth_credentials: Vec<BasicAuth>,
    hmacauth_credentials: Vec<HmacAuth>,
    jwt_secrets: Vec<JwtAuth>,
    mtls_auth_credentials: Vec<MtlsAuth>,
    oauth2_credentials: Vec<Oauth2Credential>,
    acls: Vec<AclGroup>,
    consumer_groups: Vec<FileConsumerGroup>,
    consumer_group_consumers: Vec<ConsumerGroupConsumer>,
    consumer_group_plugins: Vec<ConsumerGroupPlugin>,
    plugins: Vec<Plugin>,
    rbac_roles: Vec<FileRbacRole>,
    rbac_endpoint_permissions: Vec<RbacEndpointPermission>,
    key_sets: Vec<KeySet>,
    keys: Vec<Key>,
    vaults: Vec<Vault>,
    licenses: Vec<License>,
    service_packages: Vec<FileServicePackage>,
    service_versions: Vec<ServiceVersion>,
    documents: Vec<Document>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileService {
    #[serde(flatten)]
    service: Service,
    /// Shorthand for protocol, host, port and path
    url: Option<String>,
    routes: Vec<FileRoute>,
    plugins: Vec<Plugin>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileRoute {
    #[serde(flatten)]
    route: Route,
    plugins: Vec<Plugin>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileUpstream {
    #[serde(flatten)]
    upstream: Upstream,
    targets: Vec<Target>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FileSni {
    Name(String),
    Full(Sni),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileCertificate {
    #[serde(flatten)]
    certificate: Certificate,
    snis: Vec<FileSni>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConsumer {
    #[serde(flatten)]
    consumer: Consumer,
    keyauth_credentials: Vec<KeyAuth>,
    basicauth_credentials: Vec<BasicAuth>,
    hmacauth_credentials: Vec<HmacAuth>,
    jwt_secrets: Vec<JwtAuth>,
    mtls_auth_credentials: Vec<MtlsAuth>,
    oauth2_credentials: Vec<Oauth2Credential>,
    acls: Vec<AclGroup>,
    plugins: Vec<Plugin>,
    /// Consumer groups this consumer belongs to
    groups: Vec<ForeignRef>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConsumerGroup {
    #[serde(flatten)]
    group: ConsumerGroup,
    consumers: Vec<ForeignRef>,
    plugins: Vec<ConsumerGroupPlugin>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileRbacRole {
    #[serde(flatten)]
    role: RbacRole,
    endpoint_permissions: Vec<RbacEndpointPermission>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileServicePackage {
    #[serde(flatten)]
    package: ServicePackage,
    versions: Vec<FileServiceVersion>,
    documents: Vec<Document>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileServiceVersion {
    #[serde(flatten)]
    version: ServiceVersion,
    /// Gateway service implementing this version
    service: Option<ForeignRef>,
    control_plane_id: Option<String>,
    documents: Vec<Document>,
}

impl StateFile {
    /// Parse file content; JSON when `is_json`, YAML otherwise
    pub fn parse(content: &str, is_json: bool) -> SyncResult<Self> {
        if is_json {
            Ok(serde_json::from_str(content)?)
        } else {
            Ok(serde_yaml::from_str(content)?)
        }
    }

    pub async fn read<P: AsRef<Path>>(path: P) -> SyncResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SyncError::Io {
                message: format!("failed to read {}: {}", path.display(), e),
            })?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        Self::parse(&content, is_json)
    }
}

/// Read and merge state files into one target state
pub async fn load_files<P: AsRef<Path>>(paths: &[P], options: &LoadOptions) -> SyncResult<KongState> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        debug!(path = %path.as_ref().display(), "reading state file");
        files.push(StateFile::read(path).await?);
    }
    build_state(files, options)
}

/// Flatten the given files and add every entity to a fresh state, parents first
pub fn build_state(files: Vec<StateFile>, options: &LoadOptions) -> SyncResult<KongState> {
    let mut collector = Collector {
        options,
        entities: Vec::new(),
    };
    for file in files {
        collector.file(file)?;
    }

    // stable sort keeps declaration order within a type
    let mut entities = collector.entities;
    entities.sort_by_key(EntityVariant::entity_type);

    let mut state = KongState::new();
    for entity in entities {
        state.add_variant(entity)?;
    }
    Ok(state)
}

struct Collector<'a> {
    options: &'a LoadOptions,
    entities: Vec<EntityVariant>,
}

impl Collector<'_> {
    fn push<E: Entity>(&mut self, mut entity: E) {
        if self.options.skip_consumers
            && (E::TYPE == EntityType::Consumer
                || entity
                    .foreign_refs()
                    .iter()
                    .any(|(entity_type, _)| *entity_type == EntityType::Consumer))
        {
            return;
        }
        entity.fill_defaults();
        if let Some(tags) = entity.tags_mut() {
            for tag in &self.options.select_tags {
                let tags = tags.get_or_insert_with(Vec::new);
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }
        }
        self.entities.push(entity.into());
    }

    fn file(&mut self, file: StateFile) -> SyncResult<()> {
        for service in file.services {
            self.service(service)?;
        }
        for route in file.routes {
            self.route(route, None);
        }
        for upstream in file.upstreams {
            let parent = parent_ref(&upstream.upstream.id, &upstream.upstream.name);
            for mut target in upstream.targets {
                target.upstream = Some(parent.clone());
                self.push(target);
            }
            self.push(upstream.upstream);
        }
        file.targets.into_iter().for_each(|t| self.push(t));
        for certificate in file.certificates {
            self.certificate(certificate)?;
        }
        file.snis.into_iter().for_each(|s| self.push(s));
        file.ca_certificates.into_iter().for_each(|c| self.push(c));
        for consumer in file.consumers {
            self.consumer(consumer);
        }
        file.keyauth_credentials.into_iter().for_each(|c| self.push(c));
        file.basicauth_credentials.into_iter().for_each(|c| self.push(c));
        file.hmacauth_credentials.into_iter().for_each(|c| self.push(c));
        file.jwt_secrets.into_iter().for_each(|c| self.push(c));
        file.mtls_auth_credentials.into_iter().for_each(|c| self.push(c));
        file.oauth2_credentials.into_iter().for_each(|c| self.push(c));
        file.acls.into_iter().for_each(|c| self.push(c));
        for group in file.consumer_groups {
            let parent = parent_ref(&group.group.id, &group.group.name);
            for consumer in group.consumers {
                self.push(ConsumerGroupConsumer {
                    consumer_group: Some(parent.clone()),
                    consumer: Some(consumer),
                    ..Default::default()
                });
            }
            for mut plugin in group.plugins {
                plugin.consumer_group = Some(parent.clone());
                self.push(plugin);
            }
            self.push(group.group);
        }
        file.consumer_group_consumers.into_iter().for_each(|m| self.push(m));
        file.consumer_group_plugins.into_iter().for_each(|p| self.push(p));
        file.plugins.into_iter().for_each(|p| self.push(p));
        for role in file.rbac_roles {
            let parent = parent_ref(&role.role.id, &role.role.name);
            for mut permission in role.endpoint_permissions {
                permission.role = Some(parent.clone());
                self.push(permission);
            }
            self.push(role.role);
        }
        file.rbac_endpoint_permissions.into_iter().for_each(|p| self.push(p));
        file.key_sets.into_iter().for_each(|k| self.push(k));
        file.keys.into_iter().for_each(|k| self.push(k));
        file.vaults.into_iter().for_each(|v| self.push(v));
        file.licenses.into_iter().for_each(|l| self.push(l));
        for package in file.service_packages {
            self.service_package(package)?;
        }
        file.service_versions.into_iter().for_each(|v| self.push(v));
        file.documents.into_iter().for_each(|d| self.push(d));
        Ok(())
    }

    fn service(&mut self, file: FileService) -> SyncResult<()> {
        let mut service = file.service;
        if let Some(url) = &file.url {
            apply_url(&mut service, url)?;
        }
        let parent = parent_ref(&service.id, &service.name);
        for route in file.routes {
            self.route(route, Some(parent.clone()));
        }
        for mut plugin in file.plugins {
            plugin.service = Some(parent.clone());
            self.push(plugin);
        }
        self.push(service);
        Ok(())
    }

    fn route(&mut self, file: FileRoute, service: Option<ForeignRef>) {
        let mut route = file.route;
        if service.is_some() {
            route.service = service;
        }
        let parent = parent_ref(&route.id, &route.name);
        for mut plugin in file.plugins {
            plugin.route = Some(parent.clone());
            self.push(plugin);
        }
        self.push(route);
    }

    fn certificate(&mut self, file: FileCertificate) -> SyncResult<()> {
        let certificate = file.certificate;
        let natural = certificate.natural_key();
        let parent = match (&certificate.id, natural) {
            (Some(id), _) => ForeignRef::by_id(id.as_str()),
            (None, Some(key)) => ForeignRef::by_name(key),
            (None, None) => {
                return Err(SyncError::validation("certificate without id nor cert/key"));
            }
        };
        for sni in file.snis {
            let mut sni = match sni {
                FileSni::Name(name) => Sni {
                    name: Some(name),
                    ..Default::default()
                },
                FileSni::Full(sni) => sni,
            };
            sni.certificate = Some(parent.clone());
            self.push(sni);
        }
        self.push(certificate);
        Ok(())
    }

    fn consumer(&mut self, file: FileConsumer) {
        let consumer = file.consumer;
        let parent = parent_ref(
            &consumer.id,
            &consumer.username.clone().or_else(|| consumer.custom_id.clone()),
        );
        macro_rules! scoped {
            ($list:expr) => {
                for mut credential in $list {
                    credential.consumer = Some(parent.clone());
                    self.push(credential);
                }
            };
        }
        scoped!(file.keyauth_credentials);
        scoped!(file.basicauth_credentials);
        scoped!(file.hmacauth_credentials);
        scoped!(file.jwt_secrets);
        scoped!(file.mtls_auth_credentials);
        scoped!(file.oauth2_credentials);
        scoped!(file.acls);
        scoped!(file.plugins);
        for group in file.groups {
            self.push(ConsumerGroupConsumer {
                consumer_group: Some(group),
                consumer: Some(parent.clone()),
                ..Default::default()
            });
        }
        self.push(consumer);
    }

    fn service_package(&mut self, file: FileServicePackage) -> SyncResult<()> {
        let package = file.package;
        let parent = parent_ref(&package.id, &package.name);
        for file_version in file.versions {
            let mut version = file_version.version;
            version.service_package = Some(parent.clone());
            if let Some(service) = file_version.service {
                version.control_plane_service_relation = Some(ServiceRelation {
                    id: None,
                    service: Some(service),
                    control_plane_id: file_version
                        .control_plane_id
                        .or_else(|| self.options.control_plane_id.clone()),
                });
            }
            let version_ref = match (&version.id, version.ref_name()) {
                (id, Some(name)) => ForeignRef {
                    id: id.clone(),
                    name: Some(name),
                },
                (Some(id), None) => ForeignRef::by_id(id.as_str()),
                (None, None) => {
                    return Err(SyncError::validation(
                        "service version needs an id or a named package and version",
                    ));
                }
            };
            for mut document in file_version.documents {
                document.service_version = Some(version_ref.clone());
                document.service_package = None;
                self.push(document);
            }
            self.push(version);
        }
        for mut document in file.documents {
            document.service_package = Some(parent.clone());
            self.push(document);
        }
        self.push(package);
        Ok(())
    }
}

fn parent_ref(id: &Option<String>, name: &Option<String>) -> ForeignRef {
    ForeignRef {
        id: id.clone(),
        name: name.clone(),
    }
}

/// Expand `url: https://host:port/path` into the individual service fields
fn apply_url(service: &mut Service, raw: &str) -> SyncResult<()> {
    let url = Url::parse(raw).map_err(|e| SyncError::validation(format!("invalid service url '{}': {}", raw, e)))?;
    service.protocol = Some(url.scheme().to_string());
    service.host = url.host_str().map(str::to_string);
    service.port = url.port_or_known_default();
    let path = url.path();
    service.path = if path.is_empty() || (path == "/" && !raw.ends_with('/')) {
        None
    } else {
        Some(path.to_string())
    };
    Ok(())
}

/// Top-level key each entity type is rendered under
fn file_key(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Service => "services",
        EntityType::Route => "routes",
        EntityType::Upstream => "upstreams",
        EntityType::Target => "targets",
        EntityType::Certificate => "certificates",
        EntityType::Sni => "snis",
        EntityType::CACertificate => "ca_certificates",
        EntityType::Consumer => "consumers",
        EntityType::KeyAuth => "keyauth_credentials",
        EntityType::BasicAuth => "basicauth_credentials",
        EntityType::HmacAuth => "hmacauth_credentials",
        EntityType::JwtAuth => "jwt_secrets",
        EntityType::MtlsAuth => "mtls_auth_credentials",
        EntityType::Oauth2Credential => "oauth2_credentials",
        EntityType::AclGroup => "acls",
        EntityType::ConsumerGroup => "consumer_groups",
        EntityType::ConsumerGroupConsumer => "consumer_group_consumers",
        EntityType::Plugin => "plugins",
        EntityType::ConsumerGroupPlugin => "consumer_group_plugins",
        EntityType::RbacRole => "rbac_roles",
        EntityType::RbacEndpointPermission => "rbac_endpoint_permissions",
        EntityType::KeySet => "key_sets",
        EntityType::Key => "keys",
        EntityType::Vault => "vaults",
        EntityType::License => "licenses",
        EntityType::ServicePackage => "service_packages",
        EntityType::ServiceVersion => "service_versions",
        EntityType::Document => "documents",
    }
}

/// Render a state as a flat state file; timestamps are left out
///
/// Loading the rendered document yields an equivalent state.
pub fn render(state: &KongState) -> SyncResult<Value> {
    let mut document = Map::new();
    document.insert("_format_version".to_string(), Value::from("3.0"));
    for entity_type in EntityType::ALL {
        let items = with_entity_type!(entity_type, E => {
            state
                .get_all::<E>()
                .into_iter()
                .map(|mut entity| {
                    entity.clear_timestamps();
                    serde_json::to_value(entity)
                })
                .collect::<Result<Vec<_>, _>>()?
        });
        if !items.is_empty() {
            document.insert(file_key(entity_type).to_string(), Value::Array(items));
        }
    }
    Ok(Value::Object(document))
}
