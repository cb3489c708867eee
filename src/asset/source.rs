#[cfg(test)]
use mockall::automock;
use tonic::async_trait;
use tonic::codec::CompressionEncoding;
use tonic::transport::Channel;
use tonic::Code;
use tracing::debug;
use tracing::warn;

use crate::proto::asset::asset_management_client::AssetManagementClient;
use crate::proto::asset::Asset as ProtoAsset;
use crate::proto::asset::GetAssetByTokenRequest;
use crate::ApiDemux;
use crate::Asset;
use crate::AssetError;
use crate::AssetReference;
use crate::GrpcConnector;
use crate::Result;
use crate::RoutingKey;

/// Backend lookup of assets.
///
/// `Ok(None)` means every consulted backend answered and none knows the
/// asset.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AssetSource: Send + Sync {
    async fn fetch_asset(
        &self,
        reference: &AssetReference,
    ) -> Result<Option<Asset>>;
}

#[async_trait]
impl AssetSource for ApiDemux<GrpcConnector> {
    async fn fetch_asset(
        &self,
        reference: &AssetReference,
    ) -> Result<Option<Asset>> {
        let request = GetAssetByTokenRequest {
            tenant_id: reference.tenant_id.to_string(),
            token: reference.token.clone(),
        };

        let outcome = self
            .invoke_routed(
                &RoutingKey::Tenant(reference.tenant_id.clone()),
                |channel: Channel| {
                    let request = request.clone();
                    async move {
                        let mut client = AssetManagementClient::new(channel)
                            .send_compressed(CompressionEncoding::Gzip)
                            .accept_compressed(CompressionEncoding::Gzip);
                        match client.get_asset_by_token(tonic::Request::new(request)).await {
                            Ok(response) => Ok(response.into_inner().asset),
                            Err(status) if status.code() == Code::NotFound => Ok(None),
                            Err(status) => Err(status),
                        }
                    }
                },
                first_found,
            )
            .await?;

        match outcome.value {
            Some(asset) => {
                if !outcome.failed.is_empty() {
                    debug!(failed = outcome.failed.len(), "asset resolved despite failed backends");
                }
                Ok(Some(asset.into()))
            }
            None if outcome.failed.is_empty() => Ok(None),
            None => {
                for (target, e) in &outcome.failed {
                    warn!(backend = %target, "asset lookup failed: {}", e);
                }
                Err(AssetError::ResolutionUnavailable(format!(
                    "{} of the asset backends failed and none knows {}",
                    outcome.failed.len(),
                    reference
                ))
                .into())
            }
        }
    }
}

/// First hit in target order
fn first_found(responses: Vec<(String, Option<ProtoAsset>)>) -> Option<ProtoAsset> {
    responses.into_iter().find_map(|(_, asset)| asset)
}
