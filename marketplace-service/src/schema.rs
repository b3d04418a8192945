diesel::table! {
    users (id) {
        id -> Uuid,
        email -> Varchar,
        role -> Varchar,
    }
}

diesel::table! {
    events (id) {
        id -> Uuid,
        user_id -> Uuid,
        name -> Varchar,
        event_date -> Timestamptz,
        location -> Varchar,
    }
}

diesel::table! {
    products (id) {
        id -> Uuid,
        vendor_id -> Uuid,
        name -> Varchar,
        product_type -> Varchar,
        price -> Numeric,
        quantity -> Nullable<Int4>,
        daily_capacity -> Nullable<Int4>,
    }
}

diesel::table! {
    orders (id) {
        id -> Uuid,
        user_id -> Uuid,
        event_id -> Uuid,
        total_amount -> Numeric,
        status -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    order_items (id) {
        id -> Uuid,
        order_id -> Uuid,
        product_id -> Uuid,
        quantity -> Int4,
        price -> Numeric,
        start_date -> Nullable<Date>,
        end_date -> Nullable<Date>,
        delivery_date -> Nullable<Date>,
    }
}

diesel::table! {
    payments (id) {
        id -> Uuid,
        order_id -> Uuid,
        provider -> Varchar,
        status -> Varchar,
        reference -> Nullable<Varchar>,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    availability (id) {
        id -> Uuid,
        product_id -> Uuid,
        start_date -> Date,
        end_date -> Date,
        quantity -> Int4,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        aggregate_id -> Uuid,
        event_type -> Varchar,
        event_data -> Jsonb,
        processed -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(orders -> events (event_id));
diesel::joinable!(order_items -> orders (order_id));
diesel::joinable!(order_items -> products (product_id));
diesel::joinable!(payments -> orders (order_id));
diesel::joinable!(availability -> products (product_id));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    events,
    products,
    orders,
    order_items,
    payments,
    availability,
    outbox_events,
);
