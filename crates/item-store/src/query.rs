use common::{OrderId, VariantId};
use serde::{Deserialize, Serialize};

use crate::item::{InventoryStatus, ProductItem};

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: usize = i32::MAX as usize;

/// Filtering options for product items. Unset fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemFilter {
    pub variant_id: Option<VariantId>,
    pub status: Option<InventoryStatus>,
    pub order_id: Option<OrderId>,
}

impl ItemFilter {
    /// Returns true if the item matches every set criterion.
    pub fn matches(&self, item: &ProductItem) -> bool {
        if let Some(variant_id) = self.variant_id
            && item.variant_id != variant_id
        {
            return false;
        }
        if let Some(status) = self.status
            && item.status != status
        {
            return false;
        }
        if let Some(order_id) = self.order_id
            && item.order_id != Some(order_id)
        {
            return false;
        }
        true
    }
}

/// The field to order product items by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderField {
    #[default]
    Id,
}

/// The direction to order a list of items by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Ordering options for product items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemOrder {
    pub field: OrderField,
    pub direction: SortDirection,
}

/// A filtered, ordered, paginated item query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemQuery {
    pub filter: ItemFilter,
    pub skip: usize,
    pub first: usize,
    pub order_by: ItemOrder,
}

impl Default for ItemQuery {
    fn default() -> Self {
        Self {
            filter: ItemFilter::default(),
            skip: 0,
            first: DEFAULT_PAGE_SIZE,
            order_by: ItemOrder::default(),
        }
    }
}

impl ItemQuery {
    /// Creates a query returning every item, ascending by id.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the query to one variant.
    pub fn variant(mut self, variant_id: VariantId) -> Self {
        self.filter.variant_id = Some(variant_id);
        self
    }

    /// Restricts the query to one status.
    pub fn status(mut self, status: InventoryStatus) -> Self {
        self.filter.status = Some(status);
        self
    }

    /// Restricts the query to units linked to one order.
    pub fn order(mut self, order_id: OrderId) -> Self {
        self.filter.order_id = Some(order_id);
        self
    }

    /// Sets the page window.
    pub fn page(mut self, skip: usize, first: usize) -> Self {
        self.skip = skip;
        self.first = first;
        self
    }

    /// Sets the sort direction.
    pub fn direction(mut self, direction: SortDirection) -> Self {
        self.order_by.direction = direction;
        self
    }
}

/// One page of results plus connection metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(rename = "nodes")]
    pub items: Vec<T>,
    pub total_count: usize,
    pub has_next_page: bool,
}

impl<T> Page<T> {
    /// Builds a page, deriving `has_next_page` from the window and total.
    pub fn new(items: Vec<T>, total_count: usize, skip: usize, first: usize) -> Self {
        Self {
            items,
            total_count,
            has_next_page: skip.saturating_add(first) < total_count,
        }
    }
}
