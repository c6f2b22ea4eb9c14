//! Inventory Tool Service
//!
//! An MCP server exposing the inventory operations the agent may call. Each
//! tool is a thin adapter: it forwards to the inventory REST API and turns the
//! JSON answer into a short sentence that reads well when spoken. Validation
//! and persistence stay in the REST API.

use reqwest::{Method, Url};
use rmcp::{
    ServerHandler,
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::{ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

/// How many items a list answer reads out before summarising the rest.
const SPOKEN_LIST_LIMIT: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum InventoryApiError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid inventory API URL: {0}")]
    InvalidUrl(String),
    #[error("{0}")]
    Rejected(String),
}

/// The `{success, data, error, message}` envelope the inventory API answers with.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Value,
    error: Option<String>,
    message: Option<String>,
}

/// A successful inventory API answer.
#[derive(Debug)]
pub struct ApiReply {
    pub data: Value,
    pub message: Option<String>,
}

/// HTTP client for the inventory REST API.
#[derive(Clone, Debug)]
pub struct InventoryApi {
    client: reqwest::Client,
    base_url: String,
}

impl InventoryApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Builds an endpoint URL from path segments, percent-encoding each one so
    /// a product name can never change the route.
    fn endpoint_url(&self, segments: &[&str]) -> Result<Url, InventoryApiError> {
        let mut url =
            Url::parse(&self.base_url).map_err(|e| InventoryApiError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| InventoryApiError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn request(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<ApiReply, InventoryApiError> {
        let url = self.endpoint_url(segments)?;
        let endpoint = url.path().to_string();
        let mut request = self.client.request(method, url).query(query);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let transport = |source| InventoryApiError::Transport {
            endpoint: endpoint.clone(),
            source,
        };
        let envelope: Envelope = request
            .send()
            .await
            .map_err(transport)?
            .json()
            .await
            .map_err(transport)?;

        if envelope.success {
            Ok(ApiReply {
                data: envelope.data,
                message: envelope.message,
            })
        } else {
            Err(InventoryApiError::Rejected(
                envelope.error.unwrap_or_else(|| "Unknown error".to_string()),
            ))
        }
    }
}

// --- Tool arguments ---

#[derive(Deserialize, JsonSchema, Debug)]
pub struct SearchProductsArgs {
    /// Search term matched against product name, description, or SKU.
    pub search_term: Option<String>,
    /// Filter by type: bed-covers, cushion-covers, sarees, towels.
    #[serde(rename = "type")]
    pub product_type: Option<String>,
    /// Only show products with low stock (quantity below 10).
    pub low_stock: Option<bool>,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct AddProductArgs {
    /// The name of the product.
    pub name: String,
    /// Product type: bed-covers, cushion-covers, sarees, or towels.
    #[serde(rename = "type")]
    pub product_type: String,
    /// The quantity to add.
    pub quantity: i64,
    /// The selling price per unit in dollars.
    pub price: f64,
    /// SKU code, auto-generated when omitted.
    pub sku: Option<String>,
    /// Total cost price per unit in dollars.
    pub cost: Option<f64>,
    /// Cost breakdown as a JSON array string, e.g. '[{"category":"Material","amount":20}]'.
    pub cost_breakdown: Option<String>,
    /// Product description (max 500 chars).
    pub description: Option<String>,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct UpdateProductArgs {
    /// Product name, SKU, or ID to update.
    pub product_identifier: String,
    /// New product name.
    pub name: Option<String>,
    /// New SKU.
    pub sku: Option<String>,
    /// New product type.
    #[serde(rename = "type")]
    pub product_type: Option<String>,
    /// New quantity.
    pub quantity: Option<i64>,
    /// New selling price per unit in dollars.
    pub price: Option<f64>,
    /// New cost price per unit in dollars.
    pub cost: Option<f64>,
    /// New cost breakdown as a JSON array string.
    pub cost_breakdown: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New caption.
    pub caption: Option<String>,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct ListProductsArgs {
    /// Filter by type: bed-covers, cushion-covers, sarees, towels, or all.
    #[serde(rename = "type")]
    pub product_type: Option<String>,
    /// Only show low stock products.
    pub low_stock: Option<bool>,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct ProductIdentifierArgs {
    /// Product name, SKU, or ID.
    pub product_identifier: String,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct UpdateInventoryArgs {
    /// The name or partial name of the product to update.
    pub product_name: String,
    /// Amount to change quantity by (positive to add, negative to subtract).
    pub quantity_change: Option<i64>,
    /// Or set a specific new quantity.
    pub new_quantity: Option<i64>,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct RecordSaleArgs {
    /// The name, SKU, or ID of the product being sold.
    pub product_name: String,
    /// The quantity being sold.
    pub quantity: i64,
    /// The actual sale price per unit; defaults to the list price.
    pub sell_price: Option<f64>,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct SalesHistoryArgs {
    /// Filter by product name or SKU.
    pub product_name: Option<String>,
    /// Start of the date range, ISO 8601.
    pub start_date: Option<String>,
    /// End of the date range, ISO 8601.
    pub end_date: Option<String>,
    /// Maximum number of sales to return (defaults to 10).
    pub limit: Option<u32>,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct RecentSalesArgs {
    /// Number of recent sales to retrieve (defaults to 5).
    pub limit: Option<u32>,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct ViewAnalyticsArgs {
    /// Time period: today, week, month, 2months, year, or all.
    pub period: String,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct PeriodArgs {
    /// Time period: today, week, month, 2months, year, or all (defaults to month).
    pub period: Option<String>,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct MonthlyProfitsArgs {
    /// Number of months to retrieve (defaults to 6).
    pub months: Option<u32>,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct TopProductsArgs {
    /// Time period: today, week, month, 2months, year, or all (defaults to month).
    pub period: Option<String>,
    /// Sort by: revenue, quantity, or profit (defaults to revenue).
    pub sort_by: Option<String>,
    /// Number of top products to return (defaults to 5).
    pub limit: Option<u32>,
}

#[derive(Deserialize, JsonSchema, Debug)]
pub struct LowStockArgs {
    /// Stock threshold for alerts (defaults to 10).
    pub threshold: Option<i64>,
}

// --- Spoken formatting ---

fn str_field<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("N/A")
}

fn num_field(value: &Value, key: &str) -> f64 {
    value.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn display_field(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => "N/A".to_string(),
    }
}

fn list_tail(total: usize, suffix: &str) -> String {
    if total > SPOKEN_LIST_LIMIT {
        format!("... and {} more{}", total - SPOKEN_LIST_LIMIT, suffix)
    } else {
        String::new()
    }
}

pub fn format_product_list(products: &[Value]) -> String {
    if products.is_empty() {
        return "No products found matching your search.".to_string();
    }
    let mut response = format!("Found {} product(s):\n", products.len());
    for p in products.iter().take(SPOKEN_LIST_LIMIT) {
        response.push_str(&format!(
            "- {} (SKU: {}, Quantity: {}, Price: ${})\n",
            str_field(p, "name"),
            str_field(p, "sku"),
            display_field(p, "quantity"),
            display_field(p, "price"),
        ));
    }
    response.push_str(&list_tail(products.len(), "."));
    response
}

pub fn format_low_stock(products: &[Value]) -> String {
    if products.is_empty() {
        return "No low stock alerts. All products are well stocked.".to_string();
    }
    let mut response = format!("{} low stock alert(s):\n", products.len());
    for p in products.iter().take(SPOKEN_LIST_LIMIT) {
        response.push_str(&format!(
            "- {} (Quantity: {}, SKU: {})\n",
            str_field(p, "name"),
            display_field(p, "quantity"),
            str_field(p, "sku"),
        ));
    }
    response.push_str(&list_tail(products.len(), " items need restocking."));
    response
}

pub fn format_analytics(period: &str, data: &Value) -> String {
    format!(
        "Analytics for {}: Revenue: ${:.2}, Profit: ${:.2}, Sales: {}, Profit margin: {:.1}%",
        period,
        num_field(data, "totalRevenue"),
        num_field(data, "totalProfit"),
        num_field(data, "salesCount"),
        num_field(data, "profitMargin"),
    )
}

pub fn format_summary(data: &Value) -> String {
    format!(
        "Inventory Summary: {} products, Total value: ${:.2}, Low stock items: {}",
        num_field(data, "totalProducts"),
        num_field(data, "totalValue"),
        num_field(data, "lowStockCount"),
    )
}

pub fn format_product_detail(product: &Value) -> String {
    format!(
        "Product: {}, SKU: {}, Type: {}, Quantity: {}, Price: ${}, Cost: ${}",
        str_field(product, "name"),
        str_field(product, "sku"),
        str_field(product, "type"),
        display_field(product, "quantity"),
        display_field(product, "price"),
        product
            .get("cost")
            .map(|_| display_field(product, "cost"))
            .unwrap_or_else(|| "0".to_string()),
    )
}

/// Names the fields a product update touched, for the spoken confirmation.
pub fn format_product_update(identifier: &str, args: &UpdateProductArgs) -> String {
    let mut fields = Vec::new();
    if args.name.as_deref().is_some_and(|n| !n.is_empty()) {
        fields.push("name".to_string());
    }
    if let Some(price) = args.price {
        fields.push(format!("price (${price})"));
    }
    if let Some(cost) = args.cost {
        fields.push(format!("cost (${cost})"));
    }
    if let Some(quantity) = args.quantity {
        fields.push(format!("quantity ({quantity})"));
    }
    let fields = if fields.is_empty() {
        "product details".to_string()
    } else {
        fields.join(", ")
    };
    format!("Successfully updated {fields} for '{identifier}'.")
}

/// Sales embed their product as `productId`; older rows carry only the id.
fn sale_product_name(sale: &Value) -> &str {
    sale.get("productId")
        .and_then(|p| p.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("Unknown")
}

pub fn format_sales_history(sales: &[Value]) -> String {
    if sales.is_empty() {
        return "No sales found for the specified criteria.".to_string();
    }
    let mut response = format!("Found {} sale(s):\n", sales.len());
    for sale in sales.iter().take(SPOKEN_LIST_LIMIT) {
        response.push_str(&format!(
            "- {} ({} units, ${:.2}, Profit: ${:.2})\n",
            sale_product_name(sale),
            display_field(sale, "quantity"),
            num_field(sale, "totalSaleValue"),
            num_field(sale, "profit"),
        ));
    }
    response.push_str(&list_tail(sales.len(), "."));
    response
}

pub fn format_recent_sales(sales: &[Value]) -> String {
    if sales.is_empty() {
        return "No sales recorded yet.".to_string();
    }
    let mut response = format!("Recent {} sale(s):\n", sales.len());
    for sale in sales.iter().take(SPOKEN_LIST_LIMIT) {
        response.push_str(&format!(
            "- {} ({} units, ${:.2})\n",
            sale_product_name(sale),
            display_field(sale, "quantity"),
            num_field(sale, "totalSaleValue"),
        ));
    }
    response.push_str(&list_tail(sales.len(), "."));
    response
}

pub fn format_profit_stats(period: &str, data: &Value) -> String {
    format!(
        "Profit stats for {}: Total profit: ${:.2}, Revenue: ${:.2}, Cost: ${:.2}, Average profit per sale: ${:.2}",
        period,
        num_field(data, "totalProfit"),
        num_field(data, "totalRevenue"),
        num_field(data, "totalCost"),
        num_field(data, "averageProfit"),
    )
}

pub fn format_monthly_profits(months: u32, data: &[Value]) -> String {
    if data.is_empty() {
        return "No profit data available.".to_string();
    }
    let mut response = format!("Monthly profits (last {months} months):\n");
    for month in data.iter().take(SPOKEN_LIST_LIMIT) {
        response.push_str(&format!(
            "- {}: ${:.2}\n",
            month.get("month").and_then(Value::as_str).unwrap_or("Unknown"),
            num_field(month, "profit"),
        ));
    }
    response
}

pub fn format_top_products(period: &str, sort_by: &str, products: &[Value]) -> String {
    if products.is_empty() {
        return format!("No sales data available for {period}.");
    }
    let shown = &products[..products.len().min(SPOKEN_LIST_LIMIT)];
    let mut response = format!("Top {} product(s) by {} for {}:\n", shown.len(), sort_by, period);
    for (rank, p) in shown.iter().enumerate() {
        response.push_str(&format!(
            "{}. {} (SKU: {}, Profit: ${:.2})\n",
            rank + 1,
            p.get("name").and_then(Value::as_str).unwrap_or("Unknown"),
            str_field(p, "sku"),
            num_field(p, "profit"),
        ));
    }
    response
}

pub fn format_sales_trends(period: &str, data: &Value) -> String {
    format!(
        "Sales trends for {}: Total sales: {}, Average per day: {:.1}, Trend: {}",
        period,
        num_field(data, "totalSales"),
        num_field(data, "averagePerDay"),
        data.get("trend").and_then(Value::as_str).unwrap_or("stable"),
    )
}

fn period_or_month(period: Option<String>) -> String {
    period
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| "month".to_string())
}

fn as_list(data: &Value) -> &[Value] {
    data.as_array().map(Vec::as_slice).unwrap_or_default()
}

// --- Service and Handler Implementation ---

/// MCP server exposing inventory operations as tools.
pub struct InventoryService {
    api: InventoryApi,
    tool_router: ToolRouter<Self>,
}

#[tool_handler]
impl ServerHandler for InventoryService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[tool_router]
impl InventoryService {
    pub fn new(api: InventoryApi) -> Self {
        Self {
            api,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Search for products in the inventory by name, description, SKU, or type. Use when the user wants to find or look up products."
    )]
    pub async fn search_products(
        &self,
        args: Parameters<SearchProductsArgs>,
    ) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'search_products'");
        let mut query = Vec::new();
        if let Some(term) = args.0.search_term.filter(|t| !t.is_empty()) {
            query.push(("search", term));
        }
        if let Some(product_type) = args.0.product_type.filter(|t| !t.is_empty()) {
            query.push(("type", product_type));
        }
        if args.0.low_stock.unwrap_or(false) {
            query.push(("lowStock", "true".to_string()));
        }

        let reply = self
            .api
            .request(Method::GET, &["api", "products"], &query, None)
            .await
            .map_err(|e| format!("Search failed: {e}"))?;
        Ok(format_product_list(as_list(&reply.data)))
    }

    #[tool(
        description = "Add a new product to the inventory. Use when the user wants to add, create, or insert a new product."
    )]
    pub async fn add_product(&self, args: Parameters<AddProductArgs>) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'add_product'");
        let args = args.0;
        let mut product = json!({
            "name": args.name,
            "type": args.product_type,
            "quantity": args.quantity,
            "price": args.price,
        });
        if let Some(sku) = args.sku.filter(|s| !s.is_empty()) {
            product["sku"] = json!(sku);
        }
        if let Some(cost) = args.cost {
            product["cost"] = json!(cost);
        }
        if let Some(description) = args.description.filter(|d| !d.is_empty()) {
            product["description"] = json!(description);
        }
        if let Some(breakdown) = args.cost_breakdown {
            match serde_json::from_str::<Value>(&breakdown) {
                Ok(parsed) => product["costBreakdown"] = parsed,
                Err(e) => warn!(%breakdown, error = %e, "Ignoring unparsable cost breakdown"),
            }
        }

        let reply = self
            .api
            .request(Method::POST, &["api", "products"], &[], Some(product))
            .await
            .map_err(|e| format!("Failed to add product: {e}"))?;
        Ok(format!(
            "Successfully added {} units of '{}' (SKU: {}) to inventory at ${} per unit.",
            args.quantity,
            args.name,
            str_field(&reply.data, "sku"),
            args.price
        ))
    }

    #[tool(
        description = "Update an existing product's details like name, SKU, type, price, cost, description, caption, or cost breakdown."
    )]
    pub async fn update_product(
        &self,
        args: Parameters<UpdateProductArgs>,
    ) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'update_product'");
        let args = args.0;
        let mut update = json!({ "product_identifier": args.product_identifier });
        let text_fields = [
            ("name", &args.name),
            ("sku", &args.sku),
            ("type", &args.product_type),
            ("description", &args.description),
            ("caption", &args.caption),
        ];
        for (key, value) in text_fields {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                update[key] = json!(value);
            }
        }
        if let Some(quantity) = args.quantity {
            update["quantity"] = json!(quantity);
        }
        if let Some(price) = args.price {
            update["price"] = json!(price);
        }
        if let Some(cost) = args.cost {
            update["cost"] = json!(cost);
        }
        if let Some(breakdown) = &args.cost_breakdown {
            match serde_json::from_str::<Value>(breakdown) {
                Ok(parsed) => update["costBreakdown"] = parsed,
                Err(e) => warn!(%breakdown, error = %e, "Ignoring unparsable cost breakdown"),
            }
        }

        self.api
            .request(
                Method::PUT,
                &["api", "products", &args.product_identifier],
                &[],
                Some(update),
            )
            .await
            .map_err(|e| format!("Failed to update product: {e}"))?;
        Ok(format_product_update(&args.product_identifier, &args))
    }

    #[tool(
        description = "List all products, optionally filtered by type or low stock. Use when the user wants to see all products or products of a specific type."
    )]
    pub async fn list_products(
        &self,
        args: Parameters<ListProductsArgs>,
    ) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'list_products'");
        let mut query = Vec::new();
        if let Some(product_type) = args
            .0
            .product_type
            .filter(|t| !t.is_empty() && t != "all")
        {
            query.push(("type", product_type));
        }
        if args.0.low_stock.unwrap_or(false) {
            query.push(("lowStock", "true".to_string()));
        }

        let reply = self
            .api
            .request(Method::GET, &["api", "products"], &query, None)
            .await
            .map_err(|e| format!("Failed to list products: {e}"))?;
        let products = as_list(&reply.data);
        if products.is_empty() {
            return Ok("No products found.".to_string());
        }
        Ok(format_product_list(products))
    }

    #[tool(description = "Get detailed information about a specific product by name, SKU, or ID.")]
    pub async fn get_product(
        &self,
        args: Parameters<ProductIdentifierArgs>,
    ) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'get_product'");
        let reply = self
            .api
            .request(
                Method::GET,
                &["api", "products", &args.0.product_identifier],
                &[],
                None,
            )
            .await
            .map_err(|e| format!("Product not found: {e}"))?;
        Ok(format_product_detail(&reply.data))
    }

    #[tool(
        description = "Delete a product from inventory. Use when the user wants to remove a product permanently."
    )]
    pub async fn delete_product(
        &self,
        args: Parameters<ProductIdentifierArgs>,
    ) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'delete_product'");
        let identifier = args.0.product_identifier;
        self.api
            .request(Method::DELETE, &["api", "products", &identifier], &[], None)
            .await
            .map_err(|e| format!("Failed to delete product: {e}"))?;
        Ok(format!("Successfully deleted product '{identifier}'."))
    }

    #[tool(
        description = "Update the quantity of an existing product. Use when the user wants to increase, decrease, or set stock levels."
    )]
    pub async fn update_inventory(
        &self,
        args: Parameters<UpdateInventoryArgs>,
    ) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'update_inventory'");
        let args = args.0;
        let mut update = json!({ "product_name": args.product_name });
        if let Some(change) = args.quantity_change {
            update["quantity_change"] = json!(change);
        }
        if let Some(quantity) = args.new_quantity {
            update["new_quantity"] = json!(quantity);
        }

        let reply = self
            .api
            .request(
                Method::PUT,
                &["api", "products", "quantity", &args.product_name],
                &[],
                Some(update),
            )
            .await
            .map_err(|e| format!("Failed to update inventory: {e}"))?;
        Ok(format!(
            "Successfully updated inventory for '{}'. {}",
            args.product_name,
            reply.message.unwrap_or_default()
        )
        .trim_end()
        .to_string())
    }

    #[tool(
        description = "Record a sale of a product. Use when the user mentions selling, sold, or making a sale. Automatically reduces product quantity."
    )]
    pub async fn record_sale(&self, args: Parameters<RecordSaleArgs>) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'record_sale'");
        let args = args.0;
        let mut sale = json!({
            "productName": args.product_name,
            "quantity": args.quantity,
        });
        if let Some(price) = args.sell_price {
            sale["sellPrice"] = json!(price);
        }

        let reply = self
            .api
            .request(Method::POST, &["api", "sales"], &[], Some(sale))
            .await
            .map_err(|e| format!("Failed to record sale: {e}"))?;
        Ok(format!(
            "Sale recorded! Sold {} units of {}. Total: ${:.2}, Profit: ${:.2}",
            args.quantity,
            args.product_name,
            num_field(&reply.data, "totalSaleValue"),
            num_field(&reply.data, "profit"),
        ))
    }

    #[tool(
        description = "Get sales history, optionally filtered by product and date range."
    )]
    pub async fn get_sales_history(
        &self,
        args: Parameters<SalesHistoryArgs>,
    ) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'get_sales_history'");
        let args = args.0;
        let mut query = vec![("limit", args.limit.unwrap_or(10).to_string())];
        let filters = [
            ("product", args.product_name),
            ("startDate", args.start_date),
            ("endDate", args.end_date),
        ];
        for (key, value) in filters {
            if let Some(value) = value.filter(|v| !v.is_empty()) {
                query.push((key, value));
            }
        }

        let reply = self
            .api
            .request(Method::GET, &["api", "sales"], &query, None)
            .await
            .map_err(|e| format!("Failed to get sales history: {e}"))?;
        Ok(format_sales_history(as_list(&reply.data)))
    }

    #[tool(description = "Get the most recent sales transactions.")]
    pub async fn get_recent_sales(
        &self,
        args: Parameters<RecentSalesArgs>,
    ) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'get_recent_sales'");
        let limit = args.0.limit.unwrap_or(5);
        let reply = self
            .api
            .request(
                Method::GET,
                &["api", "sales"],
                &[("limit", limit.to_string())],
                None,
            )
            .await
            .map_err(|e| format!("Failed to get sales: {e}"))?;
        Ok(format_recent_sales(as_list(&reply.data)))
    }

    #[tool(
        description = "Get sales analytics and insights. Use when the user asks about sales, revenue, profit, or performance."
    )]
    pub async fn view_analytics(
        &self,
        args: Parameters<ViewAnalyticsArgs>,
    ) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'view_analytics'");
        let period = args.0.period;
        let reply = self
            .api
            .request(
                Method::GET,
                &["api", "analytics", "profit"],
                &[("period", period.clone())],
                None,
            )
            .await
            .map_err(|e| format!("Failed to get analytics: {e}"))?;
        Ok(format_analytics(&period, &reply.data))
    }

    #[tool(
        description = "Get the inventory summary: total products, total value, and number of low stock items."
    )]
    pub async fn get_inventory_summary(&self) -> Result<String, String> {
        info!("Executing tool 'get_inventory_summary'");
        let reply = self
            .api
            .request(Method::GET, &["api", "analytics", "summary"], &[], None)
            .await
            .map_err(|e| format!("Failed to get summary: {e}"))?;
        Ok(format_summary(&reply.data))
    }

    #[tool(description = "Get detailed profit statistics and financial performance for a period.")]
    pub async fn get_profit_stats(&self, args: Parameters<PeriodArgs>) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'get_profit_stats'");
        let period = period_or_month(args.0.period);
        let reply = self
            .api
            .request(
                Method::GET,
                &["api", "analytics", "profit"],
                &[("period", period.clone())],
                None,
            )
            .await
            .map_err(|e| format!("Failed to get profit stats: {e}"))?;
        Ok(format_profit_stats(&period, &reply.data))
    }

    #[tool(description = "Get the monthly profit breakdown for the last few months.")]
    pub async fn get_monthly_profits(
        &self,
        args: Parameters<MonthlyProfitsArgs>,
    ) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'get_monthly_profits'");
        let months = args.0.months.unwrap_or(6);
        let reply = self
            .api
            .request(
                Method::GET,
                &["api", "analytics", "monthly-profits"],
                &[("months", months.to_string())],
                None,
            )
            .await
            .map_err(|e| format!("Failed to get monthly profits: {e}"))?;
        Ok(format_monthly_profits(months, as_list(&reply.data)))
    }

    #[tool(
        description = "Get top selling products ranked by revenue, quantity sold, or profit."
    )]
    pub async fn get_top_products(
        &self,
        args: Parameters<TopProductsArgs>,
    ) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'get_top_products'");
        let args = args.0;
        let period = period_or_month(args.period);
        let sort_by = args
            .sort_by
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "revenue".to_string());
        let query = [
            ("period", period.clone()),
            ("sortBy", sort_by.clone()),
            ("limit", args.limit.unwrap_or(5).to_string()),
        ];
        let reply = self
            .api
            .request(Method::GET, &["api", "analytics", "top-products"], &query, None)
            .await
            .map_err(|e| format!("Failed to get top products: {e}"))?;
        Ok(format_top_products(&period, &sort_by, as_list(&reply.data)))
    }

    #[tool(description = "Get products that are low in stock or out of stock.")]
    pub async fn get_low_stock_alerts(
        &self,
        args: Parameters<LowStockArgs>,
    ) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'get_low_stock_alerts'");
        let threshold = args.0.threshold.unwrap_or(10);
        let reply = self
            .api
            .request(
                Method::GET,
                &["api", "analytics", "low-stock"],
                &[("threshold", threshold.to_string())],
                None,
            )
            .await
            .map_err(|e| format!("Failed to get alerts: {e}"))?;
        Ok(format_low_stock(as_list(&reply.data)))
    }

    #[tool(description = "Get sales trends and patterns over time: week, month, 2months, or year.")]
    pub async fn get_sales_trends(&self, args: Parameters<PeriodArgs>) -> Result<String, String> {
        info!(args = ?args.0, "Executing tool 'get_sales_trends'");
        let period = period_or_month(args.0.period);
        let reply = self
            .api
            .request(
                Method::GET,
                &["api", "analytics", "trends"],
                &[("period", period.clone())],
                None,
            )
            .await
            .map_err(|e| format!("Failed to get trends: {e}"))?;
        Ok(format_sales_trends(&period, &reply.data))
    }
}
