// Garage schema - embedded document store table for Diesel ORM

diesel::table! {
    documents (collection, id) {
        id -> Text,
        collection -> Text,
        fields -> Text,
        created_at -> Text,
        updated_at -> Text,
    }
}
