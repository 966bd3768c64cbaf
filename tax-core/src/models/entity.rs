use serde::{Deserialize, Serialize};

use super::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Product,
    Category,
    Customer,
    Shipping,
    Payment,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Category => "category",
            Self::Customer => "customer",
            Self::Shipping => "shipping",
            Self::Payment => "payment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "product" => Some(Self::Product),
            "category" => Some(Self::Category),
            "customer" => Some(Self::Customer),
            "shipping" => Some(Self::Shipping),
            "payment" => Some(Self::Payment),
            _ => None,
        }
    }

    /// Whether rows of this type are addressed by id.
    pub fn takes_id(&self) -> bool {
        matches!(self, Self::Product | Self::Category | Self::Customer)
    }
}

/// The thing a rule applies to, or the thing a caller is pricing.
///
/// On a rule, `None` means "any entity of this type". On caller conditions,
/// `None` means the caller did not name a specific row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum EntityRef {
    Product(Option<i64>),
    Category(Option<i64>),
    Customer(Option<i64>),
    Shipping,
    Payment,
}

impl EntityRef {
    /// Rebuilds a reference from its stored `(entity_type, entity_id)` pair.
    pub fn from_parts(entity_type: &str, entity_id: Option<i64>) -> Result<Self, ModelError> {
        let kind = EntityType::parse(entity_type)
            .ok_or_else(|| ModelError::UnknownEntityType(entity_type.to_string()))?;

        match (kind, entity_id) {
            (EntityType::Product, id) => Ok(Self::Product(id)),
            (EntityType::Category, id) => Ok(Self::Category(id)),
            (EntityType::Customer, id) => Ok(Self::Customer(id)),
            (EntityType::Shipping, None) => Ok(Self::Shipping),
            (EntityType::Payment, None) => Ok(Self::Payment),
            (kind, Some(id)) => Err(ModelError::EntityIdNotAllowed {
                entity_type: kind.as_str(),
                entity_id: id,
            }),
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Product(_) => EntityType::Product,
            Self::Category(_) => EntityType::Category,
            Self::Customer(_) => EntityType::Customer,
            Self::Shipping => EntityType::Shipping,
            Self::Payment => EntityType::Payment,
        }
    }

    pub fn id(&self) -> Option<i64> {
        match self {
            Self::Product(id) | Self::Category(id) | Self::Customer(id) => *id,
            Self::Shipping | Self::Payment => None,
        }
    }

    /// Exact-or-wildcard match of a rule target (`self`) against a caller's entity.
    ///
    /// A rule pinned to an id only matches a caller naming that same id.
    pub fn accepts(&self, caller: Option<&EntityRef>) -> bool {
        if let Some(caller) = caller {
            if caller.entity_type() != self.entity_type() {
                return false;
            }
        }

        match self.id() {
            None => true,
            Some(rule_id) => caller.and_then(EntityRef::id) == Some(rule_id),
        }
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.id() {
            Some(id) => write!(f, "{}:{}", self.entity_type().as_str(), id),
            None => f.write_str(self.entity_type().as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CustomerType {
    Individual,
    Company,
}

impl CustomerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::Company => "company",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "individual" => Some(Self::Individual),
            "company" => Some(Self::Company),
            _ => None,
        }
    }
}
