//! 声明式控制器端到端测试：路由、参数绑定、model attribute

use std::sync::{Arc, Mutex};

use revane_core::{ApplicationContext, CONTROLLER_COMPONENT};
use revane_web::error_codes;
use revane_web::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

struct UserController;

#[controller]
impl UserController {
    #[get_mapping("/user/:id")]
    async fn get_user(&self, #[param] id: String) -> String {
        id
    }

    #[get_mapping("/users/:lang")]
    async fn search(&self, #[param] lang: String, #[query("ids")] ids: String) -> String {
        format!("{}{}", lang, ids)
    }

    #[get_mapping("/header")]
    async fn header(&self, #[header("x-test")] value: String) -> String {
        value
    }

    #[post_mapping("/echo")]
    async fn echo(&self, #[body] body: Value) -> axum::Json<Value> {
        axum::Json(body)
    }

    #[get_mapping("/teapot")]
    async fn teapot(&self, #[response] response: RevaneResponse) -> &'static str {
        response.status(418).header("x-brewed", "no");
        "short and stout"
    }

    #[request_mapping("/any")]
    async fn any(&self, #[request] request: RevaneRequest) -> String {
        request.method().to_string()
    }

    #[get_mapping("/count/:n")]
    async fn count(&self, #[param] n: u32) -> String {
        (n + 1).to_string()
    }

    #[get_mapping("/query")]
    async fn query(&self, #[query_parameters] query: Value) -> axum::Json<Value> {
        axum::Json(query)
    }

    fn not_a_route(&self) -> u32 {
        1
    }
}

struct BindingController;

#[controller]
impl BindingController {
    #[get_mapping("/bind/named")]
    async fn named(
        &self,
        #[query] page: String,
        #[header] authorization: String,
        #[cookie] session: String,
    ) -> String {
        format!("{} {} {}", page, authorization, session)
    }

    #[get_mapping("/bind/whole")]
    async fn whole(
        &self,
        #[cookies] cookies: Value,
        #[headers] headers: Value,
        #[log] log: RequestLog,
    ) -> axum::Json<Value> {
        log.info("binding whole values");
        axum::Json(json!({
            "cookies": cookies,
            "agent": headers["x-agent"],
            "request_id": log.request_id(),
        }))
    }

    #[get_mapping("/bind/mixed-case")]
    async fn mixed_case(&self, #[header("X-Test")] value: String) -> String {
        value
    }

    #[get_mapping("/bind/tags")]
    async fn tags(&self, #[query] tag: Vec<String>) -> String {
        tag.join("+")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CurrentUser {
    name: String,
}

struct UserResolver;

#[controller]
impl UserResolver {
    #[model_attribute("user")]
    async fn resolve(&self, #[header("x-user")] name: String) -> CurrentUser {
        CurrentUser { name }
    }
}

struct ProfileController;

#[controller]
impl ProfileController {
    #[get_mapping("/profile")]
    async fn profile(&self, #[model_attribute] user: CurrentUser) -> String {
        user.name
    }
}

struct GhostController;

#[controller]
impl GhostController {
    #[get_mapping("/ghost")]
    async fn ghost(&self, #[model_attribute("ghost")] user: CurrentUser) -> String {
        user.name
    }
}

struct DuplicateA;

#[controller]
impl DuplicateA {
    #[model_attribute("dup")]
    fn first(&self) -> CurrentUser {
        CurrentUser { name: "a".into() }
    }
}

struct DuplicateB;

#[controller]
impl DuplicateB {
    #[model_attribute("dup")]
    fn second(&self) -> CurrentUser {
        CurrentUser { name: "b".into() }
    }
}

struct DuplicateConsumer;

#[controller]
impl DuplicateConsumer {
    #[get_mapping("/dup")]
    async fn dup(&self, #[model_attribute] dup: CurrentUser) -> String {
        dup.name
    }
}

fn options() -> RevaneOptions {
    RevaneOptions::default().port(0).silent(true)
}

async fn start(context: Arc<ApplicationContext>, configure: impl FnOnce(&mut RevaneServer)) -> (RevaneServer, String) {
    let mut server = RevaneServer::new(context, options());
    configure(&mut server);
    let addr = server.listen(None).await.unwrap();
    (server, format!("http://{}", addr))
}

fn user_context() -> Arc<ApplicationContext> {
    let context = Arc::new(ApplicationContext::new());
    context
        .register_singleton("userController", || Ok(UserController))
        .unwrap();
    context
}

#[tokio::test]
async fn test_path_and_query_parameters() {
    let (mut server, base) = start(user_context(), |server| {
        server.register("userController");
    })
    .await;

    let body = reqwest::get(format!("{}/user/42", base)).await.unwrap().text().await.unwrap();
    assert_eq!(body, "42");

    let body = reqwest::get(format!("{}/users/de?ids=1,2", base))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "de1,2");

    let body = reqwest::get(format!("{}/count/41", base)).await.unwrap().text().await.unwrap();
    assert_eq!(body, "42");

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_invalid_parameter_is_bad_request() {
    let (mut server, base) = start(user_context(), |server| {
        server.register("userController");
    })
    .await;

    let response = reqwest::get(format!("{}/count/abc", base)).await.unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], error_codes::REV_ERR_INVALID_PARAMETER);

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_header_body_and_whole_query() {
    let (mut server, base) = start(user_context(), |server| {
        server.register("userController");
    })
    .await;
    let client = reqwest::Client::new();

    let body = client
        .get(format!("{}/header", base))
        .header("x-test", "header value")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "header value");

    let echoed: Value = client
        .post(format!("{}/echo", base))
        .json(&json!({"name": "revane", "tags": [1, 2]}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(echoed, json!({"name": "revane", "tags": [1, 2]}));

    let query: Value = client
        .get(format!("{}/query?a=1&b=two", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(query, json!({"a": "1", "b": "two"}));

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_inferred_and_whole_value_bindings() {
    let context = Arc::new(ApplicationContext::new());
    context
        .register_singleton("bindingController", || Ok(BindingController))
        .unwrap();
    let (mut server, base) = start(context, |server| {
        server.register("bindingController");
    })
    .await;
    let client = reqwest::Client::new();

    let body = client
        .get(format!("{}/bind/named?page=3", base))
        .header("Authorization", "Bearer t")
        .header("Cookie", "session=s1; theme=dark")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "3 Bearer t s1");

    let response = client
        .get(format!("{}/bind/whole", base))
        .header("Cookie", "session=s1; theme=dark")
        .header("X-Agent", "tests")
        .send()
        .await
        .unwrap();
    let request_id = response.headers()["x-request-id"].to_str().unwrap().to_string();
    let whole: Value = response.json().await.unwrap();
    assert_eq!(whole["cookies"], json!({"session": "s1", "theme": "dark"}));
    assert_eq!(whole["agent"], "tests");
    assert_eq!(whole["request_id"], request_id);

    let body = client
        .get(format!("{}/bind/mixed-case", base))
        .header("x-TEST", "any case")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "any case");

    let body = client
        .get(format!("{}/bind/tags?tag=a&tag=b", base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "a+b");

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_reply_status_and_headers() {
    let (mut server, base) = start(user_context(), |server| {
        server.register("userController");
    })
    .await;

    let response = reqwest::get(format!("{}/teapot", base)).await.unwrap();
    assert_eq!(response.status().as_u16(), 418);
    assert_eq!(response.headers()["x-brewed"], "no");
    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.text().await.unwrap(), "short and stout");

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_request_mapping_matches_all_methods() {
    let (mut server, base) = start(user_context(), |server| {
        server.register("userController");
    })
    .await;
    let client = reqwest::Client::new();

    for method in [reqwest::Method::GET, reqwest::Method::POST, reqwest::Method::DELETE] {
        let body = client
            .request(method.clone(), format!("{}/any", base))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, method.as_str());
    }

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_register_controllers_by_component_type() {
    let context = Arc::new(ApplicationContext::new());
    context
        .register_component("userController", CONTROLLER_COMPONENT, || Ok(UserController))
        .unwrap();

    let routes = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&routes);
    let (mut server, base) = start(context, move |server| {
        server.register_controllers().ready(move |error, instance| {
            assert!(error.is_none());
            let mut seen = seen.lock().unwrap();
            for route in instance.routes() {
                seen.push(format!("{} {}", route.methods, route.path));
            }
        });
    })
    .await;

    let routes = routes.lock().unwrap().clone();
    assert_eq!(routes.len(), 8);
    assert!(routes.contains(&"GET /user/:id".to_string()));
    assert!(routes.contains(&"ALL /any".to_string()));

    let body = reqwest::get(format!("{}/user/7", base)).await.unwrap().text().await.unwrap();
    assert_eq!(body, "7");

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_model_attribute_from_other_bean() {
    let context = Arc::new(ApplicationContext::new());
    context
        .register_singleton("userResolver", || Ok(UserResolver))
        .unwrap();
    context
        .register_singleton("profileController", || Ok(ProfileController))
        .unwrap();

    let (mut server, base) = start(context, |server| {
        server.register("profileController");
    })
    .await;

    let body = reqwest::Client::new()
        .get(format!("{}/profile", base))
        .header("x-user", "heureka")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "heureka");

    server.close().await.unwrap();
}

#[tokio::test]
async fn test_missing_model_attribute_converter() {
    let context = Arc::new(ApplicationContext::new());
    context
        .register_singleton("ghostController", || Ok(GhostController))
        .unwrap();

    let mut server = RevaneServer::new(context, options());
    server.register("ghostController");
    let error = server.listen(None).await.unwrap_err();
    assert_eq!(error.code(), error_codes::REV_ERR_MISSING_MODEL_ATTRIBUTE_CONVERTER);
    assert!(error.to_string().contains("ghost"));
}

#[tokio::test]
async fn test_duplicate_model_attribute_converter() {
    let context = Arc::new(ApplicationContext::new());
    context.register_singleton("a", || Ok(DuplicateA)).unwrap();
    context.register_singleton("b", || Ok(DuplicateB)).unwrap();
    context
        .register_singleton("consumer", || Ok(DuplicateConsumer))
        .unwrap();

    let mut server = RevaneServer::new(context, options());
    server.register("consumer");
    let error = server.listen(None).await.unwrap_err();
    assert_eq!(error.code(), error_codes::REV_ERR_DUPLICATE_MODEL_ATTRIBUTE_CONVERTER);
}

#[tokio::test]
async fn test_converter_bean_is_not_a_controller() {
    let context = Arc::new(ApplicationContext::new());
    context
        .register_singleton("userResolver", || Ok(UserResolver))
        .unwrap();

    let mut server = RevaneServer::new(context, options());
    server.register("userResolver");
    let error = server.listen(None).await.unwrap_err();
    assert_eq!(error.code(), error_codes::REV_ERR_NOT_REGISTRABLE);
}

#[test]
fn test_plain_methods_survive_expansion() {
    assert_eq!(UserController.not_a_route(), 1);
}
