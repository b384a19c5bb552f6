//! Local filtering, sorting and pagination over store resources

use crate::config::{FilteringConfig, StoreConfig};
use crate::definition::{classify_field, FieldKind, RelationType, ResourceDefinition};
use crate::error::{Error, Result};
use crate::query::{FilteringParam, Query, SortDirection, SortingParam};
use crate::resource::StoreResource;
use crate::store::StoreData;
use serde_json::Value;
use std::cmp::Ordering;
use std::str::FromStr;
use std::sync::Arc;

/// A custom filter operator: `(filter_value, field_value) -> matches`
pub type FilterPredicate = Arc<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

/// Built-in filter operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Iexact,
    Exact,
    Contains,
    Icontains,
    In,
    Gt,
    Gte,
    Lt,
    Lte,
    Startswith,
    Istartswith,
    Endswith,
    Iendswith,
}

impl FromStr for FilterOperator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "iexact" => Self::Iexact,
            "exact" => Self::Exact,
            "contains" => Self::Contains,
            "icontains" => Self::Icontains,
            "in" => Self::In,
            "gt" => Self::Gt,
            "gte" => Self::Gte,
            "lt" => Self::Lt,
            "lte" => Self::Lte,
            "startswith" => Self::Startswith,
            "istartswith" => Self::Istartswith,
            "endswith" => Self::Endswith,
            "iendswith" => Self::Iendswith,
            other => return Err(Error::UnknownOperator(other.to_string())),
        })
    }
}

fn lower(value: &Value) -> Option<String> {
    value.as_str().map(str::to_lowercase)
}

fn iequals(a: &Value, b: &Value) -> bool {
    match (lower(a), lower(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a == b,
    }
}

/// Order two JSON scalars of the same kind; `None` for incomparable values
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

impl FilterOperator {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Iexact => "iexact",
            Self::Exact => "exact",
            Self::Contains => "contains",
            Self::Icontains => "icontains",
            Self::In => "in",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Startswith => "startswith",
            Self::Istartswith => "istartswith",
            Self::Endswith => "endswith",
            Self::Iendswith => "iendswith",
        }
    }

    fn string_filter<'v>(&self, filter_value: &'v Value) -> Result<&'v str> {
        filter_value.as_str().ok_or_else(|| Error::InvalidFilterValue {
            operator: self.name().to_string(),
            reason: format!("expected a string, got {}", filter_value),
        })
    }

    /// Test a field value against the filter value
    pub fn matches(&self, filter_value: &Value, field_value: &Value) -> Result<bool> {
        let matched = match self {
            Self::Iexact => iequals(filter_value, field_value),
            Self::Exact => filter_value == field_value,
            Self::Contains => match field_value {
                Value::Array(items) => items.contains(filter_value),
                Value::String(s) => s.contains(self.string_filter(filter_value)?),
                _ => false,
            },
            Self::Icontains => match field_value {
                Value::Array(items) => items.iter().any(|item| iequals(item, filter_value)),
                Value::String(s) => s
                    .to_lowercase()
                    .contains(&self.string_filter(filter_value)?.to_lowercase()),
                _ => false,
            },
            Self::In => match (filter_value, field_value) {
                (Value::Array(candidates), _) => candidates.contains(field_value),
                (_, Value::Array(items)) => items.contains(filter_value),
                _ => filter_value == field_value,
            },
            Self::Gt => compare_values(field_value, filter_value) == Some(Ordering::Greater),
            Self::Gte => matches!(
                compare_values(field_value, filter_value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Self::Lt => compare_values(field_value, filter_value) == Some(Ordering::Less),
            Self::Lte => matches!(
                compare_values(field_value, filter_value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Self::Startswith => {
                let prefix = self.string_filter(filter_value)?;
                field_value.as_str().map(|s| s.starts_with(prefix)).unwrap_or(false)
            }
            Self::Istartswith => {
                let prefix = self.string_filter(filter_value)?.to_lowercase();
                lower(field_value).map(|s| s.starts_with(&prefix)).unwrap_or(false)
            }
            Self::Endswith => {
                let suffix = self.string_filter(filter_value)?;
                field_value.as_str().map(|s| s.ends_with(suffix)).unwrap_or(false)
            }
            Self::Iendswith => {
                let suffix = self.string_filter(filter_value)?.to_lowercase();
                lower(field_value).map(|s| s.ends_with(&suffix)).unwrap_or(false)
            }
        };
        Ok(matched)
    }
}

/// Resolve a field path on a resource, following to-one relationships
///
/// The path must end on an attribute (or `id`/`type`); segments after an
/// attribute index into its JSON object. Missing values and dangling
/// relationships resolve to `None`. Paths ending on a relationship or crossing
/// a hasMany relationship are schema errors.
pub fn get_resource_field_value(
    path: &str,
    resource: &StoreResource,
    data: &StoreData,
    definitions: &[ResourceDefinition],
    separator: &str,
) -> Result<Option<Value>> {
    let fields: Vec<&str> = path.split(separator).collect();
    let mut current = resource;

    for (i, field) in fields.iter().enumerate() {
        let is_last = i == fields.len() - 1;
        match classify_field(definitions, current.resource_type(), field)? {
            FieldKind::Attribute => {
                let mut value = current.resource.attribute(field);
                for nested in &fields[i + 1..] {
                    value = value.and_then(|v| v.get(*nested));
                }
                return Ok(value.filter(|v| !v.is_null()).cloned());
            }
            FieldKind::Id | FieldKind::Type if !is_last => {
                return Err(Error::UnknownField {
                    resource_type: current.resource_type().to_string(),
                    field: fields[i + 1].to_string(),
                });
            }
            FieldKind::Id => return Ok(Some(Value::String(current.id().to_string()))),
            FieldKind::Type => return Ok(Some(Value::String(current.resource_type().to_string()))),
            FieldKind::Relationship(_) if is_last => {
                return Err(Error::PathEndsOnRelationship(path.to_string()));
            }
            FieldKind::Relationship(relation) if relation.relation_type == RelationType::HasMany => {
                return Err(Error::FilterPastHasMany(path.to_string()));
            }
            FieldKind::Relationship(_) => {
                let related = current
                    .resource
                    .relationship(field)
                    .and_then(|r| r.identifiers().first())
                    .and_then(|id| data.get(id));
                match related {
                    Some(next) => current = next.as_ref(),
                    None => return Ok(None),
                }
            }
        }
    }

    Ok(None)
}

enum Matcher<'c> {
    Custom(&'c FilterPredicate),
    Builtin(FilterOperator),
}

impl Matcher<'_> {
    fn matches(&self, filter_value: &Value, field_value: &Value) -> Result<bool> {
        match self {
            Matcher::Custom(predicate) => Ok(predicate(filter_value, field_value)),
            Matcher::Builtin(operator) => operator.matches(filter_value, field_value),
        }
    }
}

fn resolve_matchers<'c>(
    filtering: &'c [FilteringParam],
    config: &'c FilteringConfig,
) -> Result<Vec<(&'c FilteringParam, Matcher<'c>)>> {
    filtering
        .iter()
        .map(|clause| {
            let name = clause.operator_name();
            let matcher = match config.custom_operator(name) {
                Some(custom) => Matcher::Custom(custom),
                None => Matcher::Builtin(name.parse()?),
            };
            Ok((clause, matcher))
        })
        .collect()
}

/// Keep the resources satisfying every filter clause of `query`
pub fn filter_resources<'r, I>(
    resources: I,
    data: &StoreData,
    query: &Query,
    definitions: &[ResourceDefinition],
    config: &FilteringConfig,
) -> Result<Vec<Arc<StoreResource>>>
where
    I: IntoIterator<Item = &'r Arc<StoreResource>>,
{
    let matchers = resolve_matchers(&query.params.filtering, config)?;
    let mut matched = Vec::new();

    'resources: for resource in resources {
        for (clause, matcher) in &matchers {
            let field_value = get_resource_field_value(
                &clause.path,
                resource,
                data,
                definitions,
                &config.path_separator,
            )?;
            let Some(field_value) = field_value else {
                continue 'resources;
            };
            if !matcher.matches(&clause.value, &field_value)? {
                continue 'resources;
            }
        }
        matched.push(Arc::clone(resource));
    }

    Ok(matched)
}

/// Stable multi-key sort; resources lacking a key sort last in either direction
pub fn sort_resources(
    resources: &mut Vec<Arc<StoreResource>>,
    data: &StoreData,
    sorting: &[SortingParam],
    definitions: &[ResourceDefinition],
    separator: &str,
) -> Result<()> {
    if sorting.is_empty() {
        return Ok(());
    }

    let mut keyed = resources
        .drain(..)
        .map(|resource| {
            let keys = sorting
                .iter()
                .map(|s| get_resource_field_value(&s.api, &resource, data, definitions, separator))
                .collect::<Result<Vec<_>>>()?;
            Ok((keys, resource))
        })
        .collect::<Result<Vec<_>>>()?;

    keyed.sort_by(|(a, _), (b, _)| {
        for (param, (a, b)) in sorting.iter().zip(a.iter().zip(b.iter())) {
            let ordering = match (a, b) {
                (Some(a), Some(b)) => {
                    let ordering = compare_values(a, b).unwrap_or(Ordering::Equal);
                    match param.direction {
                        SortDirection::Asc => ordering,
                        SortDirection::Desc => ordering.reverse(),
                    }
                }
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });

    resources.extend(keyed.into_iter().map(|(_, resource)| resource));
    Ok(())
}

/// Apply `offset`/`limit` in place
pub fn paginate(resources: &mut Vec<Arc<StoreResource>>, offset: Option<usize>, limit: Option<usize>) {
    let offset = offset.unwrap_or(0).min(resources.len());
    resources.drain(..offset);
    if let Some(limit) = limit {
        resources.truncate(limit);
    }
}

/// Evaluate a query against the store: lookup or filter, then sort and paginate
pub fn evaluate_query(data: &StoreData, query: &Query, config: &StoreConfig) -> Result<Vec<Arc<StoreResource>>> {
    query.validate()?;
    let resource_type = query.resource_type.as_deref().unwrap_or_default();

    if let Some(id) = &query.id {
        return Ok(data.get_by(resource_type, id).cloned().into_iter().collect());
    }

    let Some(bucket) = data.resources_of_type(resource_type) else {
        return Ok(Vec::new());
    };
    let definitions = &config.resource_definitions;
    let mut results = filter_resources(bucket.values(), data, query, definitions, &config.filtering)?;
    sort_resources(
        &mut results,
        data,
        &query.params.sorting,
        definitions,
        &config.filtering.path_separator,
    )?;
    paginate(&mut results, query.params.offset, query.params.limit);
    Ok(results)
}
