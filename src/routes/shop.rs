use actix_web::{http::header, web, HttpRequest, HttpResponse, Result};
use askama::Template;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::new_id,
    cart::{self, Cart},
    db::{fetch_order, fetch_order_items, fetch_shipping_history, log_activity},
    filters,
    models::{CategoryRow, ProductRow, ShippingStatus},
    notify,
    state::{AppState, ServerEvent},
    templates::render,
};

#[derive(Clone, Debug)]
struct CategoryView {
    name: String,
    slug: String,
    selected: bool,
}

#[derive(Clone, Debug)]
struct ProductCard {
    id: String,
    name: String,
    description: String,
    price_cents: i64,
    in_stock: bool,
}

#[derive(Template)]
#[template(path = "shop.html")]
struct ShopTemplate {
    categories: Vec<CategoryView>,
    products: Vec<ProductCard>,
}

#[derive(Template)]
#[template(path = "product.html")]
struct ProductTemplate {
    product: ProductCard,
}

#[derive(Clone, Debug)]
struct CartLineView {
    product_id: String,
    name: String,
    quantity: i64,
    unit_price_cents: i64,
    line_total_cents: i64,
}

#[derive(Template)]
#[template(path = "cart.html")]
struct CartTemplate {
    lines: Vec<CartLineView>,
    is_empty: bool,
    subtotal_cents: i64,
    shipping_cents: i64,
    total_cents: i64,
    errors: Vec<String>,
    form: CheckoutView,
}

#[derive(Clone, Debug, Default)]
struct CheckoutView {
    customer_name: String,
    customer_email: String,
    customer_phone: String,
    shipping_address: String,
}

#[derive(Template)]
#[template(path = "order_success.html")]
struct OrderSuccessTemplate {
    order_id: String,
    vapid_public_key: String,
}

#[derive(Clone, Debug)]
struct ProgressStep {
    label: String,
    reached: bool,
    current: bool,
}

#[derive(Clone, Debug)]
struct OrderItemView {
    name: String,
    quantity: i64,
    unit_price_cents: i64,
    line_total_cents: i64,
}

#[derive(Clone, Debug)]
struct ShippingEventView {
    status: String,
    message: String,
    location: String,
    has_location: bool,
    created_at: String,
}

#[derive(Template)]
#[template(path = "order_status.html")]
struct OrderStatusTemplate {
    order_id: String,
    found: bool,
    status: String,
    shipping_status: String,
    tracking_number: String,
    has_tracking: bool,
    steps: Vec<ProgressStep>,
    items: Vec<OrderItemView>,
    history: Vec<ShippingEventView>,
    total_cents: i64,
    shipping_cents: i64,
    vapid_public_key: String,
}

#[derive(Deserialize)]
struct ShopQuery {
    category: Option<String>,
}

#[derive(Deserialize)]
struct CartForm {
    product_id: String,
    quantity: Option<i64>,
}

#[derive(Deserialize)]
struct CheckoutForm {
    customer_name: String,
    customer_email: String,
    customer_phone: Option<String>,
    shipping_address: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/shop").route(web::get().to(list_products)))
        .service(web::resource("/shop/product/{id}").route(web::get().to(product_detail)))
        .service(web::resource("/cart").route(web::get().to(view_cart)))
        .service(web::resource("/cart/add").route(web::post().to(add_to_cart)))
        .service(web::resource("/cart/update").route(web::post().to(update_cart)))
        .service(web::resource("/checkout").route(web::post().to(checkout)))
        .service(web::resource("/orders/{id}").route(web::get().to(order_status)))
        .service(web::resource("/orders/{id}/subscribe").route(web::post().to(subscribe)));
}

async fn list_products(
    state: web::Data<AppState>,
    query: web::Query<ShopQuery>,
) -> Result<HttpResponse> {
    let selected = query.category.as_deref().unwrap_or("");
    let categories = sqlx::query_as::<_, CategoryRow>(
        "SELECT id, name, slug FROM categories ORDER BY name",
    )
    .fetch_all(&state.db)
    .await
    .unwrap_or_default();

    let rows = if selected.is_empty() {
        sqlx::query_as::<_, ProductRow>(
            r#"SELECT id, category_id, name, description, price_cents, stock, active
               FROM products WHERE active = 1 ORDER BY name"#,
        )
        .fetch_all(&state.db)
        .await
    } else {
        sqlx::query_as::<_, ProductRow>(
            r#"SELECT p.id, p.category_id, p.name, p.description, p.price_cents, p.stock, p.active
               FROM products p
               JOIN categories c ON p.category_id = c.id
               WHERE p.active = 1 AND c.slug = ?
               ORDER BY p.name"#,
        )
        .bind(selected)
        .fetch_all(&state.db)
        .await
    }
    .unwrap_or_default();

    Ok(render(ShopTemplate {
        categories: categories
            .into_iter()
            .map(|row| CategoryView {
                selected: row.slug == selected,
                name: row.name,
                slug: row.slug,
            })
            .collect(),
        products: rows.into_iter().map(to_card).collect(),
    }))
}

async fn product_detail(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let product_id = path.into_inner();
    let row = sqlx::query_as::<_, ProductRow>(
        r#"SELECT id, category_id, name, description, price_cents, stock, active
           FROM products WHERE id = ? AND active = 1 LIMIT 1"#,
    )
    .bind(&product_id)
    .fetch_optional(&state.db)
    .await
    .unwrap_or(None);

    match row {
        Some(row) => Ok(render(ProductTemplate { product: to_card(row) })),
        None => Ok(HttpResponse::NotFound().body("Product not found")),
    }
}

async fn view_cart(state: web::Data<AppState>, req: HttpRequest) -> Result<HttpResponse> {
    let cart = Cart::from_request(&req);
    render_cart(&state, &cart, Vec::new(), CheckoutView::default()).await
}

async fn add_to_cart(
    req: HttpRequest,
    form: web::Form<CartForm>,
) -> Result<HttpResponse> {
    let mut cart = Cart::from_request(&req);
    cart.add(&form.product_id, form.quantity.unwrap_or(1).max(1));
    Ok(see_cart(cart))
}

async fn update_cart(
    req: HttpRequest,
    form: web::Form<CartForm>,
) -> Result<HttpResponse> {
    let mut cart = Cart::from_request(&req);
    cart.set_quantity(&form.product_id, form.quantity.unwrap_or(0));
    Ok(see_cart(cart))
}

fn see_cart(cart: Cart) -> HttpResponse {
    HttpResponse::SeeOther()
        .append_header((header::LOCATION, "/cart"))
        .cookie(cart.to_cookie())
        .finish()
}

/// Checkout stub: capture the cart into an order at today's prices and clear
/// the cookie. No payment step.
async fn checkout(
    state: web::Data<AppState>,
    req: HttpRequest,
    form: web::Form<CheckoutForm>,
) -> Result<HttpResponse> {
    let form = form.into_inner();
    let cart = Cart::from_request(&req);

    let mut errors = Vec::new();
    if form.customer_name.trim().is_empty() {
        errors.push("Full name is required.".to_string());
    }
    if form.customer_email.trim().is_empty() {
        errors.push("Email address is required.".to_string());
    }
    if form.shipping_address.trim().is_empty() {
        errors.push("Shipping address is required.".to_string());
    }

    let lines = cart::priced_lines(&state.db, &cart)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;
    if lines.is_empty() {
        errors.push("Your cart is empty.".to_string());
    }

    if !errors.is_empty() {
        return render_cart(
            &state,
            &cart,
            errors,
            CheckoutView {
                customer_name: form.customer_name,
                customer_email: form.customer_email,
                customer_phone: form.customer_phone.unwrap_or_default(),
                shipping_address: form.shipping_address,
            },
        )
        .await;
    }

    let totals = cart::totals(&lines);
    let order_id = new_id();
    sqlx::query(
        r#"INSERT INTO orders
           (id, customer_name, customer_email, customer_phone, shipping_address,
            total_cents, shipping_cents, status, shipping_status, created_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, 'pending', 'pending', ?)"#,
    )
    .bind(&order_id)
    .bind(form.customer_name.trim())
    .bind(form.customer_email.trim())
    .bind(&form.customer_phone)
    .bind(form.shipping_address.trim())
    .bind(totals.total_cents)
    .bind(totals.shipping_cents)
    .bind(Utc::now().to_rfc3339())
    .execute(&state.db)
    .await
    .map_err(actix_web::error::ErrorInternalServerError)?;

    for line in &lines {
        sqlx::query(
            r#"INSERT INTO order_items (id, order_id, product_id, product_name, quantity, unit_price_cents)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(new_id())
        .bind(&order_id)
        .bind(&line.product.id)
        .bind(&line.product.name)
        .bind(line.quantity)
        .bind(line.product.price_cents)
        .execute(&state.db)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;
    }

    log_activity(
        &state.db,
        "order_created",
        &format!("New order placed by {}.", form.customer_name.trim()),
        None,
        Some(&order_id),
    )
    .await;

    let _ = state.events.send(ServerEvent::order(
        "order_created",
        &order_id,
        "pending",
        format!("New order placed by {}.", form.customer_name.trim()),
        None,
    ));

    Ok(HttpResponse::Ok()
        .cookie(Cart::cleared())
        .content_type("text/html; charset=utf-8")
        .body(
            OrderSuccessTemplate {
                order_id,
                vapid_public_key: state.push.public_key.clone(),
            }
            .render()
            .map_err(actix_web::error::ErrorInternalServerError)?,
        ))
}

async fn order_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let order_id = path.into_inner();
    let Some(order) = fetch_order(&state.db, &order_id).await else {
        return Ok(render(OrderStatusTemplate {
            order_id,
            found: false,
            status: String::new(),
            shipping_status: String::new(),
            tracking_number: String::new(),
            has_tracking: false,
            steps: Vec::new(),
            items: Vec::new(),
            history: Vec::new(),
            total_cents: 0,
            shipping_cents: 0,
            vapid_public_key: state.push.public_key.clone(),
        }));
    };

    let items = fetch_order_items(&state.db, &order_id)
        .await
        .into_iter()
        .map(|row| OrderItemView {
            name: row.product_name,
            quantity: row.quantity,
            unit_price_cents: row.unit_price_cents,
            line_total_cents: row.unit_price_cents * row.quantity,
        })
        .collect();

    let history = fetch_shipping_history(&state.db, &order_id)
        .await
        .into_iter()
        .map(|row| {
            let location = row.location.unwrap_or_default();
            ShippingEventView {
                status: row.status,
                message: row.message,
                has_location: !location.trim().is_empty(),
                location,
                created_at: row.created_at,
            }
        })
        .collect();

    let tracking_number = order.tracking_number.unwrap_or_default();
    Ok(render(OrderStatusTemplate {
        order_id,
        found: true,
        steps: progress_steps(&order.shipping_status),
        status: order.status,
        shipping_status: order.shipping_status,
        has_tracking: !tracking_number.trim().is_empty(),
        tracking_number,
        items,
        history,
        total_cents: order.total_cents,
        shipping_cents: order.shipping_cents,
        vapid_public_key: state.push.public_key.clone(),
    }))
}

async fn subscribe(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Bytes,
) -> Result<HttpResponse> {
    let order_id = path.into_inner();
    if fetch_order(&state.db, &order_id).await.is_none() {
        return Ok(HttpResponse::NotFound().finish());
    }

    let raw = String::from_utf8(body.to_vec()).unwrap_or_default();
    if raw.trim().is_empty() {
        return Ok(HttpResponse::BadRequest().finish());
    }

    let _ = notify::store_subscription(&state.db, &order_id, &raw).await;
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

/// The progress bar renders whatever status string is stored; an unknown
/// label simply lights no steps.
fn progress_steps(shipping_status: &str) -> Vec<ProgressStep> {
    let reached_index = ShippingStatus::all()
        .iter()
        .position(|status| status.as_str() == shipping_status);

    ShippingStatus::all()
        .iter()
        .enumerate()
        .map(|(index, status)| ProgressStep {
            label: status.as_str().to_string(),
            reached: reached_index.is_some_and(|reached| index <= reached),
            current: reached_index == Some(index),
        })
        .collect()
}

async fn render_cart(
    state: &web::Data<AppState>,
    cart: &Cart,
    errors: Vec<String>,
    form: CheckoutView,
) -> Result<HttpResponse> {
    let lines = cart::priced_lines(&state.db, cart)
        .await
        .map_err(actix_web::error::ErrorInternalServerError)?;
    let totals = cart::totals(&lines);

    Ok(render(CartTemplate {
        is_empty: lines.is_empty(),
        lines: lines
            .into_iter()
            .map(|line| CartLineView {
                product_id: line.product.id.clone(),
                name: line.product.name.clone(),
                quantity: line.quantity,
                unit_price_cents: line.product.price_cents,
                line_total_cents: line.line_total_cents,
            })
            .collect(),
        subtotal_cents: totals.subtotal_cents,
        shipping_cents: totals.shipping_cents,
        total_cents: totals.total_cents,
        errors,
        form,
    }))
}

fn to_card(row: ProductRow) -> ProductCard {
    ProductCard {
        id: row.id,
        name: row.name,
        description: row.description,
        price_cents: row.price_cents,
        in_stock: row.stock > 0,
    }
}
