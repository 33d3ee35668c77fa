use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// The fixed source collection this app cutifies.
pub const COLLECTION_CONTRACT: &str = "0x699727F9E01A822EFdcf7333073f0461e5914b4E";

pub const STYLE_TRAIT_TYPE: &str = "Halloween Style";
pub const STYLE_TRAIT_VALUE: &str = "Cutified";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftAttribute {
    pub trait_type: String,
    pub value: String,
}

impl NftAttribute {
    pub fn new(trait_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            trait_type: trait_type.into(),
            value: value.into(),
        }
    }
}

/// Immutable identity of a source NFT. Exactly one reference is active
/// in a workflow at a time; switching discards any held mutation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftReference {
    pub token_id: String,
    pub contract_address: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub image: String,
    #[serde(default)]
    pub attributes: Vec<NftAttribute>,
}

impl NftReference {
    pub fn display_name(&self) -> String {
        if self.name.trim().is_empty() {
            format!("Warplet #{}", self.token_id)
        } else {
            self.name.clone()
        }
    }
}

/// Result of a successful mint. Created once per mint, cleared when the
/// success presentation is dismissed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintSuccess {
    pub hash: String,
    pub token_id: Option<u64>,
    pub image_uri: String,
    pub name: String,
}

pub fn mint_name(source: &NftReference) -> String {
    format!("Cutified {}", source.display_name())
}

/// Metadata record for the minted asset: the source attributes with the
/// style trait appended, plus a provenance block naming the origin
/// contract and token id.
pub fn build_mint_metadata(source: &NftReference, image_uri: &str) -> Value {
    let name = mint_name(source);
    let description = format!(
        "Adorable Halloween version of {}",
        source.display_name()
    );

    let mut attributes: Vec<Value> = source
        .attributes
        .iter()
        .map(|attribute| {
            json!({
                "trait_type": attribute.trait_type,
                "value": attribute.value,
            })
        })
        .collect();
    attributes.push(json!({
        "trait_type": STYLE_TRAIT_TYPE,
        "value": STYLE_TRAIT_VALUE,
    }));

    let mut root = Map::new();
    root.insert("name".to_string(), Value::String(name));
    root.insert("description".to_string(), Value::String(description));
    root.insert("image".to_string(), Value::String(image_uri.to_string()));
    root.insert("attributes".to_string(), Value::Array(attributes));
    root.insert(
        "properties".to_string(),
        json!({
            "origin": {
                "contract": source.contract_address,
                "tokenId": source.token_id,
            },
        }),
    );
    Value::Object(root)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{build_mint_metadata, mint_name, NftAttribute, NftReference};

    fn source() -> NftReference {
        NftReference {
            token_id: "42".to_string(),
            contract_address: super::COLLECTION_CONTRACT.to_string(),
            name: "Warplet #42".to_string(),
            description: "A warplet".to_string(),
            image: "https://example.com/42.png".to_string(),
            attributes: vec![NftAttribute::new("Background", "Violet")],
        }
    }

    #[test]
    fn mint_name_prefixes_source_name() {
        assert_eq!(mint_name(&source()), "Cutified Warplet #42");
    }

    #[test]
    fn display_name_falls_back_to_token_id() {
        let mut nft = source();
        nft.name = "  ".to_string();
        assert_eq!(nft.display_name(), "Warplet #42");
    }

    #[test]
    fn metadata_appends_style_trait_after_source_attributes() {
        let metadata = build_mint_metadata(&source(), "ipfs://image");
        let attributes = metadata["attributes"].as_array().cloned().unwrap_or_default();
        assert_eq!(attributes.len(), 2);
        assert_eq!(attributes[0]["trait_type"], json!("Background"));
        assert_eq!(attributes[1]["trait_type"], json!("Halloween Style"));
        assert_eq!(attributes[1]["value"], json!("Cutified"));
    }

    #[test]
    fn metadata_records_origin_provenance() {
        let metadata = build_mint_metadata(&source(), "ipfs://image");
        assert_eq!(metadata["image"], json!("ipfs://image"));
        assert_eq!(
            metadata["properties"]["origin"]["contract"],
            json!(super::COLLECTION_CONTRACT)
        );
        assert_eq!(metadata["properties"]["origin"]["tokenId"], json!("42"));
        assert_eq!(metadata["name"], json!("Cutified Warplet #42"));
    }
}
