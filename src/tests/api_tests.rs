#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;
    use tower::ServiceExt;

    use crate::tests::*;

    #[tokio::test]
    async fn test_tool_crud() {
        let (app, _state, _tdb) = test_app().await;

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/tools",
                json!({"barcode": " T-100 ", "name": "Akkuschrauber", "category": "Elektro", "location": ""}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["barcode"], "T-100");
        assert_eq!(body["data"]["status"], "verfügbar");
        assert!(body["data"]["location"].is_null());

        let response = app
            .clone()
            .oneshot(json_request("PUT", "/tools/T-100", json!({"location": "Regal 3"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["location"], "Regal 3");
        assert_eq!(body["data"]["name"], "Akkuschrauber");

        let body = body_json(app.clone().oneshot(get("/tools/T-100")).await.unwrap()).await;
        assert_eq!(body["data"]["category"], "Elektro");
        assert!(body["data"]["current_lending"].is_null());

        let response = app.oneshot(get("/tools/NOPE")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_create_tool_validation() {
        let (app, _state, tdb) = test_app().await;
        insert_worker(&tdb.pool, "W1", "Anna", "Schmidt").await;

        let response = app
            .clone()
            .oneshot(json_request("POST", "/tools", json!({"barcode": "T 1", "name": "Hammer"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["details"]["field"], "barcode");

        let response = app
            .clone()
            .oneshot(json_request("POST", "/tools", json!({"barcode": "T1", "name": "   "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(json_request("POST", "/tools", json!({"barcode": "..A", "name": "Hammer"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["details"]["field"], "barcode");

        // barcodes are unique across entity kinds
        let response = app
            .oneshot(json_request("POST", "/tools", json!({"barcode": "W1", "name": "Hammer"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(body_json(response).await["message"].as_str().unwrap().contains("Mitarbeiter"));
    }

    #[tokio::test]
    async fn test_concurrent_creates_claim_barcode_once() {
        let (app, _state, tdb) = test_app_with_connections(8).await;

        let mut handles = Vec::new();
        for i in 0..6 {
            let app = app.clone();
            let request = if i % 2 == 0 {
                json_request("POST", "/tools", json!({"barcode": "X100", "name": "Hammer"}))
            } else {
                json_request("POST", "/workers", json!({"barcode": "X100", "firstname": "Anna", "lastname": "Schmidt"}))
            };
            handles.push(tokio::spawn(async move { app.oneshot(request).await.unwrap().status() }));
        }
        let mut created = 0;
        for h in handles {
            match h.await.unwrap() {
                StatusCode::CREATED => created += 1,
                status => assert_eq!(status, StatusCode::CONFLICT),
            }
        }
        assert_eq!(created, 1);

        let rows: i64 = sqlx::query_scalar(
            r#"SELECT (SELECT COUNT(*) FROM tools WHERE barcode = 'X100')
                    + (SELECT COUNT(*) FROM workers WHERE barcode = 'X100')"#,
        )
        .fetch_one(&tdb.pool)
        .await
        .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_tool_list_filters() {
        let (app, _state, tdb) = test_app().await;
        insert_tool(&tdb.pool, "T1", "Bohrmaschine", "verfügbar").await;
        insert_tool(&tdb.pool, "T2", "Bohrhammer", "defekt").await;
        insert_tool(&tdb.pool, "T3", "Zange", "verfügbar").await;
        insert_tool(&tdb.pool, "T4", "100%_Sicher", "verfügbar").await;

        let body = body_json(app.clone().oneshot(get("/tools?q=bohr")).await.unwrap()).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 2);

        let body = body_json(app.clone().oneshot(get("/tools?status=defekt")).await.unwrap()).await;
        let tools = body["data"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["barcode"], "T2");

        // LIKE wildcards are matched literally
        let body = body_json(app.oneshot(get("/tools?q=%25_")).await.unwrap()).await;
        let tools = body["data"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["barcode"], "T4");
    }

    #[tokio::test]
    async fn test_tool_status_rules() {
        let (app, state, tdb) = test_app().await;
        insert_tool(&tdb.pool, "T1", "Hammer", "verfügbar").await;
        insert_worker(&tdb.pool, "W1", "Anna", "Schmidt").await;

        let response = app
            .clone()
            .oneshot(json_request("PUT", "/tools/T1/status", json!({"status": "ausgeliehen"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        state.lending.lend("T1", "W1").await.unwrap();

        let response = app
            .clone()
            .oneshot(json_request("PUT", "/tools/T1/status", json!({"status": "verfügbar"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(tool_status(&tdb.pool, "T1").await, "ausgeliehen");

        let response = app
            .clone()
            .oneshot(json_request("PUT", "/tools/T1/status", json!({"status": "defekt"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["data"]["status"], "defekt");

        let body = body_json(app.oneshot(get("/tools/T1")).await.unwrap()).await;
        assert_eq!(body["data"]["current_lending"]["worker_name"], "Anna Schmidt");
    }

    #[tokio::test]
    async fn test_tool_soft_delete_and_restore() {
        let (app, state, tdb) = test_app().await;
        insert_tool(&tdb.pool, "T1", "Hammer", "verfügbar").await;
        insert_worker(&tdb.pool, "W1", "Anna", "Schmidt").await;
        state.lending.lend("T1", "W1").await.unwrap();

        let delete = || {
            axum::http::Request::builder()
                .method("DELETE")
                .uri("/tools/T1")
                .body(axum::body::Body::empty())
                .unwrap()
        };

        let response = app.clone().oneshot(delete()).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        state.lending.return_tool("T1", None).await.unwrap();
        let response = app.clone().oneshot(delete()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(app.clone().oneshot(get("/tools")).await.unwrap()).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 0);
        let body = body_json(app.clone().oneshot(get("/tools?include_deleted=true")).await.unwrap()).await;
        assert_eq!(body["data"][0]["deleted"], true);

        // history stays reachable
        let body = body_json(app.clone().oneshot(get("/tools/T1/lendings")).await.unwrap()).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let response = app.clone().oneshot(json_request("POST", "/tools/T1/restore", json!({}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let response = app.oneshot(json_request("POST", "/tools/T1/restore", json!({}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_worker_endpoints() {
        let (app, state, tdb) = test_app().await;
        insert_tool(&tdb.pool, "T1", "Hammer", "verfügbar").await;

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/workers",
                json!({"barcode": "W1", "firstname": "Anna", "lastname": "Schmidt", "department": "Gibtsnicht"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/workers",
                json!({"barcode": "W1", "firstname": "Anna", "lastname": "Schmidt", "department": "Lager"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = body_json(app.clone().oneshot(get("/workers?department=Lager")).await.unwrap()).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
        let body = body_json(app.clone().oneshot(get("/workers?q=anna%20sch")).await.unwrap()).await;
        assert_eq!(body["data"][0]["barcode"], "W1");

        state.lending.lend("T1", "W1").await.unwrap();

        let body = body_json(app.clone().oneshot(get("/workers/W1/lendings?open_only=true")).await.unwrap()).await;
        assert_eq!(body["data"][0]["tool_name"], "Hammer");

        let delete = axum::http::Request::builder()
            .method("DELETE")
            .uri("/workers/W1")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app.clone().oneshot(delete).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .oneshot(json_request("PUT", "/workers/W1", json!({"email": "anna@example.org"})))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["data"]["email"], "anna@example.org");
    }

    #[tokio::test]
    async fn test_consumable_endpoints() {
        let (app, _state, tdb) = test_app().await;
        insert_worker(&tdb.pool, "W1", "Anna", "Schmidt").await;

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/consumables",
                json!({"barcode": "C1", "name": "Schrauben M4", "quantity": 20, "min_quantity": 10, "unit": "Stk"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(json_request("POST", "/consumables", json!({"barcode": "C2", "name": "Kleber", "quantity": -1})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/lending/consume",
                json!({"consumable_barcode": "C1", "worker_barcode": "W1", "quantity": 15}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["remaining"], 5);
        assert_eq!(body["data"]["below_minimum"], true);

        let body = body_json(app.clone().oneshot(get("/consumables?low_stock=true")).await.unwrap()).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let response = app
            .clone()
            .oneshot(json_request("POST", "/consumables/C1/stock", json!({"delta": 25, "comment": "Lieferung"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["data"]["remaining"], 30);

        let response = app
            .clone()
            .oneshot(json_request("POST", "/consumables/C1/stock", json!({"delta": -31})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        // ledger: initial stock, withdrawal, delivery
        let body = body_json(app.clone().oneshot(get("/consumables/C1/usages")).await.unwrap()).await;
        let quantities: Vec<i64> =
            body["data"].as_array().unwrap().iter().map(|u| u["quantity"].as_i64().unwrap()).collect();
        let mut sorted = quantities.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![-15, 20, 25]);

        let body = body_json(app.clone().oneshot(get("/workers/W1/usages")).await.unwrap()).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let response = app
            .oneshot(json_request("PUT", "/consumables/C1", json!({"min_quantity": 40})))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["data"]["min_quantity"], 40);
        assert_eq!(body["data"]["quantity"], 30);
    }

    #[tokio::test]
    async fn test_barcode_lookup() {
        let (app, _state, tdb) = test_app().await;
        insert_tool(&tdb.pool, "T1", "Hammer", "verfügbar").await;
        insert_worker(&tdb.pool, "W1", "Anna", "Schmidt").await;
        insert_consumable(&tdb.pool, "C1", 1, 0).await;

        let body = body_json(app.clone().oneshot(get("/barcodes/T1")).await.unwrap()).await;
        assert_eq!(body["data"]["kind"], "tool");
        assert_eq!(body["data"]["name"], "Hammer");

        let body = body_json(app.clone().oneshot(get("/barcodes/W1")).await.unwrap()).await;
        assert_eq!(body["data"]["kind"], "worker");
        assert_eq!(body["data"]["name"], "Anna Schmidt");

        let body = body_json(app.clone().oneshot(get("/barcodes/C1")).await.unwrap()).await;
        assert_eq!(body["data"]["kind"], "consumable");

        let response = app.oneshot(get("/barcodes/X9")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_department_features() {
        let (app, _state, _tdb) = test_app_with(|cfg| cfg.departments.features_enabled_by_default = false).await;

        let body = body_json(app.clone().oneshot(get("/departments")).await.unwrap()).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 2);

        let response = app
            .clone()
            .oneshot(json_request("POST", "/admin/departments", json!({"name": "Elektro"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let response = app
            .clone()
            .oneshot(json_request("POST", "/admin/departments", json!({"name": "Elektro"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = body_json(app.clone().oneshot(get("/departments/Elektro/features")).await.unwrap()).await;
        let features = body["data"].as_array().unwrap();
        assert_eq!(features.len(), 5);
        assert!(features.iter().all(|f| f["enabled"] == false && f["explicit"] == false));

        let response = app
            .clone()
            .oneshot(json_request("PUT", "/admin/departments/Elektro/features/lending", json!({"enabled": true})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(app.clone().oneshot(get("/departments/Elektro/features")).await.unwrap()).await;
        let lending = body["data"].as_array().unwrap().iter().find(|f| f["feature"] == "lending").unwrap().clone();
        assert_eq!(lending["enabled"], true);
        assert_eq!(lending["explicit"], true);

        let response = app
            .clone()
            .oneshot(json_request("PUT", "/admin/departments/Elektro/features/kantine", json!({"enabled": true})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app.oneshot(get("/departments/Nirgendwo/features")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ticket_lifecycle() {
        let (app, _state, _tdb) = test_app().await;

        let response = app
            .clone()
            .oneshot(json_request("POST", "/tickets", json!({"title": "Flex qualmt", "created_by": "Anna"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        let id = body["data"]["id"].as_i64().unwrap();
        assert_eq!(body["data"]["status"], "offen");
        assert_eq!(body["data"]["priority"], "normal");

        let response = app
            .clone()
            .oneshot(json_request("POST", &format!("/tickets/{}/notes", id), json!({"text": "Kohlen getauscht"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(json_request("PATCH", &format!("/tickets/{}", id), json!({"status": "erledigt"})))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["data"]["status"], "erledigt");
        assert!(body["data"]["resolved_at"].is_string());

        let body = body_json(app.clone().oneshot(get("/tickets?status=erledigt")).await.unwrap()).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let response = app
            .clone()
            .oneshot(json_request("PATCH", &format!("/tickets/{}", id), json!({"status": "in_bearbeitung", "priority": "hoch"})))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert!(body["data"]["resolved_at"].is_null());
        assert_eq!(body["data"]["priority"], "hoch");

        let body = body_json(app.clone().oneshot(get(&format!("/tickets/{}", id))).await.unwrap()).await;
        assert_eq!(body["data"]["notes"][0]["text"], "Kohlen getauscht");

        let response = app
            .oneshot(json_request("POST", "/tickets/999/notes", json!({"text": "Hallo"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_dashboard_counts() {
        let (app, state, tdb) = test_app().await;
        insert_tool(&tdb.pool, "T1", "Hammer", "verfügbar").await;
        insert_tool(&tdb.pool, "T2", "Säge", "defekt").await;
        insert_tool(&tdb.pool, "T3", "Alt", "verfügbar").await;
        sqlx::query("UPDATE tools SET deleted = 1 WHERE barcode = 'T3'").execute(&tdb.pool).await.unwrap();
        insert_worker(&tdb.pool, "W1", "Anna", "Schmidt").await;
        insert_consumable(&tdb.pool, "C1", 1, 5).await;
        insert_consumable(&tdb.pool, "C2", 10, 5).await;
        state.lending.lend("T1", "W1").await.unwrap();

        let body = body_json(app.oneshot(get("/dashboard")).await.unwrap()).await;
        let d = &body["data"];
        assert_eq!(d["tools_total"], 2);
        assert_eq!(d["tools_lent"], 1);
        assert_eq!(d["tools_defect"], 1);
        assert_eq!(d["tools_available"], 0);
        assert_eq!(d["workers_total"], 1);
        assert_eq!(d["consumables_total"], 2);
        assert_eq!(d["consumables_low_stock"], 1);
        assert_eq!(d["open_lendings"], 1);
        assert_eq!(d["open_tickets"], 0);
    }

    #[tokio::test]
    async fn test_security_headers_on_json_responses() {
        let (app, state, _tdb) = test_app().await;
        let app = app.layer(axum::middleware::from_fn_with_state(
            state.config.clone(),
            crate::middleware::security_headers::security_headers_middleware,
        ));

        let response = app.oneshot(get("/dashboard")).await.unwrap();
        let headers = response.headers();
        assert_eq!(headers.get("x-content-type-options").unwrap(), "nosniff");
        assert_eq!(headers.get("x-frame-options").unwrap(), "SAMEORIGIN");
        assert_eq!(headers.get("cache-control").unwrap(), "no-store");
    }
}
