use diesel::prelude::*;
use diesel::sql_types::{BigInt, Double, Text};

diesel::table! {
    pm_readings (id) {
        id -> Integer,
        node_id -> BigInt,
        node_name -> Nullable<Text>,
        timestamp -> BigInt,
        datetime_local -> Nullable<Text>,
        pm25 -> Nullable<Double>,
        pm10 -> Nullable<Double>,
        pm1 -> Nullable<Double>,
        raw -> Text,
        created_at -> BigInt,
    }
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = pm_readings)]
pub struct ReadingDTO {
    pub id: i32,
    pub node_id: i64,
    pub node_name: Option<String>,
    pub timestamp: i64,
    pub datetime_local: Option<String>,
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
    pub pm1: Option<f64>,
    pub raw: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = pm_readings)]
pub struct AddReadingDTO<'a> {
    pub node_id: i64,
    pub node_name: Option<&'a str>,
    pub timestamp: i64,
    pub datetime_local: Option<&'a str>,
    pub pm25: Option<f64>,
    pub pm10: Option<f64>,
    pub pm1: Option<f64>,
    pub raw: String,
    pub created_at: i64,
}

/// Row of a grouped average query.
#[derive(Debug, Clone, QueryableByName)]
pub struct AverageDTO {
    #[diesel(sql_type = Text)]
    pub bucket: String,
    #[diesel(sql_type = Double)]
    pub avg: f64,
    #[diesel(sql_type = BigInt)]
    pub count: i64,
}
