use axum::handler::Handler;
use axum::routing::{delete, get, head, options, patch, post, put, trace, MethodRouter};
use axum::Router;

use super::rule::{HttpMethod, PermissionRule, RuleTable};

/// Registers a handler on the router and its rule in the table in one step,
/// so both see routes in the same order.
pub struct ProtectedRouter<S = ()> {
    router: Router<S>,
    rules: RuleTable,
}

impl<S> Default for ProtectedRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ProtectedRouter<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            rules: RuleTable::new(),
        }
    }

    pub fn route<H, T>(mut self, rule: PermissionRule, handler: H) -> Self
    where
        H: Handler<T, S>,
        T: 'static,
    {
        let method_router = method_router(rule.method(), handler);
        self.router = self.router.route(rule.url(), method_router);
        self.rules.register(rule);
        self
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn into_parts(self) -> (Router<S>, RuleTable) {
        (self.router, self.rules)
    }
}

fn method_router<H, T, S>(method: HttpMethod, handler: H) -> MethodRouter<S>
where
    H: Handler<T, S>,
    T: 'static,
    S: Clone + Send + Sync + 'static,
{
    match method {
        HttpMethod::Get => get(handler),
        HttpMethod::Head => head(handler),
        HttpMethod::Post => post(handler),
        HttpMethod::Put => put(handler),
        HttpMethod::Patch => patch(handler),
        HttpMethod::Delete => delete(handler),
        HttpMethod::Options => options(handler),
        HttpMethod::Trace => trace(handler),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn noop() -> &'static str {
        "ok"
    }

    #[test]
    fn routes_and_rules_register_together_in_order() {
        let (_router, rules) = ProtectedRouter::<()>::new()
            .route(PermissionRule::post("/lcdp/app").unwrap(), noop)
            .route(PermissionRule::get("/lcdp/app/resources/:appid/:filename").unwrap(), noop)
            .into_parts();

        let urls: Vec<_> = rules.iter().map(|r| r.url().to_string()).collect();
        assert_eq!(urls, ["/lcdp/app", "/lcdp/app/resources/:appid/:filename"]);
    }
}
