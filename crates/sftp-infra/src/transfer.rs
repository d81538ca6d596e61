use async_trait::async_trait;
use aws_sdk_transfer::Client;
use aws_sdk_transfer::error::DisplayErrorContext;
use aws_sdk_transfer::types::{
    Domain, EndpointType, HomeDirectoryType, IdentityProviderType, Protocol, State, Tag,
};
use tracing::{debug, info, warn};

use sftp_core::types::{
    NewUser, ServerDescriptor, ServerId, ServerSpec, ServerState, UserCreation,
};
use sftp_core::{ControlApi, Error, Result};

const NAME_TAG: &str = "Name";

/// AWS Transfer Family control API using the `aws-sdk-transfer` crate.
///
/// Servers are matched by their `Name` tag. The public endpoint of a
/// service-managed SFTP server is derived from its id and region.
pub struct TransferControlApi {
    client: Client,
    region: Option<String>,
}

impl TransferControlApi {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(config),
            region: config.region().map(|r| r.to_string()),
        }
    }

    fn descriptor(
        &self,
        id: &str,
        name: &str,
        arn: &str,
        state: Option<&State>,
    ) -> Result<ServerDescriptor> {
        let raw = state.map(State::as_str).unwrap_or_default();
        let state = ServerState::parse(raw)
            .ok_or_else(|| Error::Control(format!("server {id}: unknown state {raw:?}")))?;

        let region = region_from_arn(arn).or(self.region.as_deref());
        let endpoint = match (state, region) {
            (ServerState::Online, Some(region)) => Some(endpoint_host(id, region)),
            _ => None,
        };

        Ok(ServerDescriptor {
            id: ServerId(id.to_string()),
            name: name.to_string(),
            state,
            endpoint,
        })
    }

    async fn name_tag(&self, arn: &str) -> Result<Option<String>> {
        let out = self
            .client
            .list_tags_for_resource()
            .arn(arn)
            .send()
            .await
            .map_err(|e| api_error("list tags", e))?;

        Ok(out
            .tags()
            .iter()
            .find(|t| t.key() == NAME_TAG)
            .map(|t| t.value().to_string()))
    }
}

/// Region segment of `arn:aws:transfer:<region>:<account>:server/<id>`.
fn region_from_arn(arn: &str) -> Option<&str> {
    arn.split(':').nth(3).filter(|r| !r.is_empty())
}

fn endpoint_host(server_id: &str, region: &str) -> String {
    format!("{server_id}.server.transfer.{region}.amazonaws.com")
}

fn tag(key: &str, value: &str) -> Result<Tag> {
    Tag::builder()
        .key(key)
        .value(value)
        .build()
        .map_err(|e| Error::Control(format!("build tag {key}: {e}")))
}

fn api_error(op: &str, e: impl std::error::Error) -> Error {
    Error::Control(format!("{op}: {}", DisplayErrorContext(e)))
}

fn server_tags(spec: &ServerSpec) -> Result<Vec<Tag>> {
    let mut tags = vec![
        tag(NAME_TAG, &spec.name)?,
        tag("AutoManaged", "true")?,
        tag("CreatedAt", &chrono::Utc::now().timestamp().to_string())?,
    ];
    if let Some(schedule) = &spec.schedule_tag {
        tags.push(tag("Schedule", schedule)?);
    }
    Ok(tags)
}

#[async_trait]
impl ControlApi for TransferControlApi {
    async fn find_server(&self, name: &str) -> Result<Option<ServerDescriptor>> {
        let mut next_token: Option<String> = None;

        loop {
            let page = self
                .client
                .list_servers()
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| api_error("list servers", e))?;

            for server in page.servers() {
                let Some(id) = server.server_id() else {
                    continue;
                };

                match self.name_tag(server.arn()).await {
                    Ok(Some(tag)) if tag == name => {
                        return self
                            .descriptor(id, name, server.arn(), server.state())
                            .map(Some);
                    }
                    Ok(_) => {}
                    Err(e) => debug!(server_id = id, error = %e, "skipping server with unreadable tags"),
                }
            }

            next_token = page.next_token().map(str::to_string);
            if next_token.is_none() {
                return Ok(None);
            }
        }
    }

    async fn create_server(&self, spec: &ServerSpec) -> Result<ServerDescriptor> {
        let out = self
            .client
            .create_server()
            .identity_provider_type(IdentityProviderType::ServiceManaged)
            .protocols(Protocol::Sftp)
            .endpoint_type(EndpointType::Public)
            .domain(Domain::S3)
            .logging_role(&spec.server_role)
            .set_tags(Some(server_tags(spec)?))
            .send()
            .await
            .map_err(|e| api_error("create server", e))?;

        let id = ServerId(out.server_id().to_string());
        info!(server_id = %id, bucket = %spec.storage.bucket, "transfer: server created");

        self.describe_server(&id).await
    }

    async fn start_server(&self, id: &ServerId) -> Result<()> {
        self.client
            .start_server()
            .server_id(&id.0)
            .send()
            .await
            .map_err(|e| api_error("start server", e))?;

        info!(server_id = %id, "transfer: server start requested");
        Ok(())
    }

    async fn stop_server(&self, id: &ServerId) -> Result<()> {
        self.client
            .stop_server()
            .server_id(&id.0)
            .send()
            .await
            .map_err(|e| api_error("stop server", e))?;

        info!(server_id = %id, "transfer: server stop requested");
        Ok(())
    }

    async fn delete_server(&self, id: &ServerId) -> Result<()> {
        if let Err(e) = self.client.delete_server().server_id(&id.0).send().await {
            if e
                .as_service_error()
                .is_some_and(|se| se.is_resource_not_found_exception())
            {
                warn!(server_id = %id, "transfer: server already deleted");
                return Ok(());
            }
            return Err(api_error("delete server", e));
        }

        info!(server_id = %id, "transfer: server deleted");
        Ok(())
    }

    async fn describe_server(&self, id: &ServerId) -> Result<ServerDescriptor> {
        let out = match self.client.describe_server().server_id(&id.0).send().await {
            Ok(out) => out,
            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_resource_not_found_exception()) =>
            {
                return Err(Error::ServerNotFound(id.clone()));
            }
            Err(e) => return Err(api_error("describe server", e)),
        };

        let server = out
            .server()
            .ok_or_else(|| Error::Control("server not found in response".into()))?;

        let name = server
            .tags()
            .iter()
            .find(|t| t.key() == NAME_TAG)
            .map(|t| t.value())
            .unwrap_or_default();

        self.descriptor(&id.0, name, server.arn(), server.state())
    }

    async fn find_user(&self, id: &ServerId, username: &str) -> Result<bool> {
        match self
            .client
            .describe_user()
            .server_id(&id.0)
            .user_name(username)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_resource_not_found_exception()) =>
            {
                Ok(false)
            }
            Err(e) => Err(api_error("describe user", e)),
        }
    }

    async fn create_user(&self, id: &ServerId, user: &NewUser) -> Result<UserCreation> {
        let public_key = user
            .public_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty());

        let result = self
            .client
            .create_user()
            .server_id(&id.0)
            .user_name(&user.username)
            .role(&user.role)
            .home_directory(&user.home_directory)
            .home_directory_type(HomeDirectoryType::Path)
            .set_ssh_public_key_body(public_key.map(str::to_string))
            .tags(tag(NAME_TAG, &user.username)?)
            .tags(tag("ServerName", &user.server_name)?)
            .send()
            .await;

        match result {
            Ok(_) => {
                info!(server_id = %id, username = %user.username, "transfer: user created");
                Ok(UserCreation::Created)
            }
            Err(e)
                if e
                    .as_service_error()
                    .is_some_and(|se| se.is_resource_exists_exception()) =>
            {
                Ok(UserCreation::AlreadyExists)
            }
            Err(e) => Err(api_error(&format!("create user {}", user.username), e)),
        }
    }

    async fn list_users(&self, id: &ServerId) -> Result<Vec<String>> {
        let mut users = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let page = self
                .client
                .list_users()
                .server_id(&id.0)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| api_error("list users", e))?;

            users.extend(
                page.users()
                    .iter()
                    .filter_map(|u| u.user_name().map(str::to_string)),
            );

            next_token = page.next_token().map(str::to_string);
            if next_token.is_none() {
                return Ok(users);
            }
        }
    }

    async fn delete_user(&self, id: &ServerId, username: &str) -> Result<()> {
        if let Err(e) = self
            .client
            .delete_user()
            .server_id(&id.0)
            .user_name(username)
            .send()
            .await
        {
            if e
                .as_service_error()
                .is_some_and(|se| se.is_resource_not_found_exception())
            {
                warn!(server_id = %id, username, "transfer: user already deleted");
                return Ok(());
            }
            return Err(api_error(&format!("delete user {username}"), e));
        }

        info!(server_id = %id, username, "transfer: user deleted");
        Ok(())
    }
}
