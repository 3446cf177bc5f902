//! Time and date utilities for scripts.
//!
//! Layouts for `format` and `parse` are strftime patterns (e.g. `%H:%M:%S`).

use std::time::Duration;

use chrono::format::{Item, StrftimeItems};
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use mlua::prelude::*;

use super::ModuleContext;

pub(crate) fn register(lua: &Lua, _ctx: &ModuleContext) -> LuaResult<LuaTable> {
    let module = lua.create_table()?;

    // time.now() / time.timestamp() -> unix seconds
    module.set(
        "now",
        lua.create_function(|_, ()| Ok(Utc::now().timestamp()))?,
    )?;
    module.set(
        "timestamp",
        lua.create_function(|_, ()| Ok(Utc::now().timestamp()))?,
    )?;

    // time.format(ts, layout) -> string
    // An invalid layout returns the layout unformatted rather than erroring.
    module.set(
        "format",
        lua.create_function(|_, (timestamp, layout): (i64, String)| {
            let items: Vec<Item> = StrftimeItems::new(&layout).collect();
            if items.iter().any(|item| matches!(item, Item::Error)) {
                return Ok(layout);
            }
            let Some(datetime) = Local.timestamp_opt(timestamp, 0).single() else {
                return Ok(layout);
            };
            Ok(datetime.format_with_items(items.into_iter()).to_string())
        })?,
    )?;

    // time.parse(layout, value) -> (ts, err)
    module.set(
        "parse",
        lua.create_function(|_, (layout, value): (String, String)| {
            if let Ok(datetime) = NaiveDateTime::parse_from_str(&value, &layout) {
                return Ok((Some(datetime.and_utc().timestamp()), None));
            }
            if let Ok(date) = NaiveDate::parse_from_str(&value, &layout) {
                let datetime = date.and_hms_opt(0, 0, 0).expect("midnight is valid");
                return Ok((Some(datetime.and_utc().timestamp()), None));
            }
            Ok((
                None,
                Some(format!("cannot parse {value:?} with layout {layout:?}")),
            ))
        })?,
    )?;

    // time.date([ts]) -> {year, month, day, hour, minute, second, weekday, yearday}
    module.set(
        "date",
        lua.create_function(|lua, timestamp: Option<i64>| {
            let timestamp = timestamp.unwrap_or_else(|| Utc::now().timestamp());
            let Some(datetime) = Local.timestamp_opt(timestamp, 0).single() else {
                return Ok(LuaValue::Nil);
            };

            let table = lua.create_table()?;
            table.set("year", datetime.year())?;
            table.set("month", datetime.month())?;
            table.set("day", datetime.day())?;
            table.set("hour", datetime.hour())?;
            table.set("minute", datetime.minute())?;
            table.set("second", datetime.second())?;
            table.set("weekday", datetime.weekday().num_days_from_sunday())?;
            table.set("yearday", datetime.ordinal())?;
            Ok(LuaValue::Table(table))
        })?,
    )?;

    // time.sleep(ms) — hard sleep, unlike system.sleep this never yields.
    module.set(
        "sleep",
        lua.create_function(|_, ms: u64| {
            std::thread::sleep(Duration::from_millis(ms));
            Ok(())
        })?,
    )?;

    Ok(module)
}

#[cfg(test)]
mod tests {
    use crate::modules::test_support::lua_with_modules;

    #[test]
    fn now_is_recent() {
        let dir = tempfile::tempdir().unwrap();
        let lua = lua_with_modules(dir.path());
        let now: i64 = lua.load("return time.now()").eval().unwrap();
        assert!(now > 1_700_000_000);
    }

    #[test]
    fn parse_then_date_fields() {
        let dir = tempfile::tempdir().unwrap();
        let lua = lua_with_modules(dir.path());
        let (ts, err): (Option<i64>, Option<String>) = lua
            .load("return time.parse('%Y-%m-%d %H:%M:%S', '2024-03-05 06:07:08')")
            .eval()
            .unwrap();
        assert!(err.is_none());
        // 2024-03-05T06:07:08 UTC
        assert_eq!(ts, Some(1_709_618_828));
    }

    #[test]
    fn parse_date_only_layout() {
        let dir = tempfile::tempdir().unwrap();
        let lua = lua_with_modules(dir.path());
        let (ts, err): (Option<i64>, Option<String>) = lua
            .load("return time.parse('%Y-%m-%d', '1970-01-02')")
            .eval()
            .unwrap();
        assert!(err.is_none());
        assert_eq!(ts, Some(86_400));
    }

    #[test]
    fn parse_failure_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let lua = lua_with_modules(dir.path());
        let (ts, err): (Option<i64>, Option<String>) = lua
            .load("return time.parse('%Y-%m-%d', 'not a date')")
            .eval()
            .unwrap();
        assert!(ts.is_none());
        assert!(err.is_some());
    }

    #[test]
    fn format_roundtrips_parse() {
        let dir = tempfile::tempdir().unwrap();
        let lua = lua_with_modules(dir.path());
        // Format is in local time; parse the result back with the same layout.
        let ok: bool = lua
            .load(
                r#"
                local layout = '%Y-%m-%d %H:%M:%S'
                local text = time.format(time.now(), layout)
                local ts, err = time.parse(layout, text)
                return ts ~= nil
                "#,
            )
            .eval()
            .unwrap();
        assert!(ok);
    }

    #[test]
    fn invalid_layout_returned_unformatted() {
        let dir = tempfile::tempdir().unwrap();
        let lua = lua_with_modules(dir.path());
        let text: String = lua.load("return time.format(0, '%Q')").eval().unwrap();
        assert_eq!(text, "%Q");
    }

    #[test]
    fn date_table_has_all_fields() {
        let dir = tempfile::tempdir().unwrap();
        let lua = lua_with_modules(dir.path());
        let ok: bool = lua
            .load(
                r#"
                local d = time.date()
                return d.year >= 2024 and d.month >= 1 and d.month <= 12
                    and d.day >= 1 and d.weekday >= 0 and d.weekday <= 6
                    and d.yearday >= 1 and d.hour >= 0 and d.minute >= 0
                    and d.second >= 0
                "#,
            )
            .eval()
            .unwrap();
        assert!(ok);
    }
}
